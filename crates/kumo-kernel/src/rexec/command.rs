//! Command-line encoding for the remote channel.
//!
//! Commands:
//!
//! | Command line                        | Payload                         |
//! |-------------------------------------|---------------------------------|
//! | `vfs-s3 <op> <mount> <args...>`     | per-op options (see [`S3Request`]) |
//! | `fetch <url>`                       | [`FetchOptions`]                |
//!
//! Every token is percent-encoded, so paths with spaces survive
//! whitespace tokenization.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{AsRefStr, Display, EnumString};

use super::RemoteError;
use crate::fetch::FetchOptions;
use crate::kube::encode_component;
use crate::vfs::{CompressOptions, CopyOptions, GrepOptions, LsOptions};

/// Object-storage operations carried by `vfs-s3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum S3Op {
    Ls,
    Cp,
    Rm,
    Fstat,
    Fslice,
    Fwrite,
    Mkdir,
    Rmdir,
    Grep,
    Gzip,
    Gunzip,
}

/// Join tokens into a command line, encoding each one.
pub fn command_line<S: AsRef<str>>(tokens: impl IntoIterator<Item = S>) -> String {
    tokens
        .into_iter()
        .map(|t| encode_component(t.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a command line on whitespace and decode each token.
pub fn tokenize(line: &str) -> Result<Vec<String>, RemoteError> {
    line.split_whitespace()
        .map(|t| {
            percent_decode_str(t)
                .decode_utf8()
                .map(|s| s.into_owned())
                .map_err(|e| RemoteError::bad_request(format!("bad token {t:?}: {e}")))
        })
        .collect()
}

fn payload<T: DeserializeOwned + Default>(options: Value) -> Result<T, RemoteError> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options).map_err(|e| RemoteError::bad_request(format!("bad options: {e}")))
}

fn one(args: Vec<String>, op: S3Op) -> Result<String, RemoteError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(path), None) => Ok(path),
        _ => Err(RemoteError::bad_request(format!("{op} takes exactly one path"))),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpPayload {
    #[serde(default)]
    options: CopyOptions,
    #[serde(default)]
    src_is_self: Vec<bool>,
    #[serde(default)]
    dst_is_self: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FstatPayload {
    #[serde(default)]
    with_data: bool,
    #[serde(default)]
    enoent_ok: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RmPayload {
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SlicePayload {
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    length: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WritePayload {
    #[serde(default)]
    data: String,
}

/// Reply payload for `fslice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReply {
    #[serde(with = "kumo_types::b64")]
    pub data: Vec<u8>,
}

/// A decoded `vfs-s3` request.
#[derive(Debug, Clone, PartialEq)]
pub enum S3Request {
    Ls {
        opts: LsOptions,
        paths: Vec<String>,
    },
    Cp {
        opts: CopyOptions,
        dst: String,
        sources: Vec<String>,
        src_is_self: Vec<bool>,
        dst_is_self: bool,
    },
    Rm {
        path: String,
        recursive: bool,
    },
    Fstat {
        path: String,
        with_data: bool,
        enoent_ok: bool,
    },
    Fslice {
        path: String,
        offset: u64,
        length: u64,
    },
    Fwrite {
        path: String,
        data: Vec<u8>,
    },
    Mkdir {
        path: String,
    },
    Rmdir {
        path: String,
    },
    Grep {
        opts: GrepOptions,
        pattern: String,
        paths: Vec<String>,
    },
    Gzip {
        opts: CompressOptions,
        paths: Vec<String>,
    },
    Gunzip {
        opts: CompressOptions,
        paths: Vec<String>,
    },
}

impl S3Request {
    pub fn op(&self) -> S3Op {
        match self {
            S3Request::Ls { .. } => S3Op::Ls,
            S3Request::Cp { .. } => S3Op::Cp,
            S3Request::Rm { .. } => S3Op::Rm,
            S3Request::Fstat { .. } => S3Op::Fstat,
            S3Request::Fslice { .. } => S3Op::Fslice,
            S3Request::Fwrite { .. } => S3Op::Fwrite,
            S3Request::Mkdir { .. } => S3Op::Mkdir,
            S3Request::Rmdir { .. } => S3Op::Rmdir,
            S3Request::Grep { .. } => S3Op::Grep,
            S3Request::Gzip { .. } => S3Op::Gzip,
            S3Request::Gunzip { .. } => S3Op::Gunzip,
        }
    }

    /// Render as `vfs-s3 <op> <mount> <args...>` plus the options payload.
    pub fn encode(&self, mount: &str) -> (String, Value) {
        let op = self.op();
        let mut tokens: Vec<&str> = vec!["vfs-s3", op.as_ref(), mount];
        let options = match self {
            S3Request::Ls { opts, paths } => {
                tokens.extend(paths.iter().map(String::as_str));
                json!(opts)
            }
            S3Request::Cp {
                opts,
                dst,
                sources,
                src_is_self,
                dst_is_self,
            } => {
                tokens.push(dst);
                tokens.extend(sources.iter().map(String::as_str));
                json!(CpPayload {
                    options: opts.clone(),
                    src_is_self: src_is_self.clone(),
                    dst_is_self: *dst_is_self,
                })
            }
            S3Request::Rm { path, recursive } => {
                tokens.push(path);
                json!(RmPayload {
                    recursive: *recursive
                })
            }
            S3Request::Fstat {
                path,
                with_data,
                enoent_ok,
            } => {
                tokens.push(path);
                json!(FstatPayload {
                    with_data: *with_data,
                    enoent_ok: *enoent_ok,
                })
            }
            S3Request::Fslice {
                path,
                offset,
                length,
            } => {
                tokens.push(path);
                json!(SlicePayload {
                    offset: *offset,
                    length: *length,
                })
            }
            S3Request::Fwrite { path, data } => {
                tokens.push(path);
                json!(WritePayload {
                    data: B64.encode(data),
                })
            }
            S3Request::Mkdir { path } | S3Request::Rmdir { path } => {
                tokens.push(path);
                Value::Null
            }
            S3Request::Grep {
                opts,
                pattern,
                paths,
            } => {
                tokens.push(pattern);
                tokens.extend(paths.iter().map(String::as_str));
                json!(opts)
            }
            S3Request::Gzip { opts, paths } | S3Request::Gunzip { opts, paths } => {
                tokens.extend(paths.iter().map(String::as_str));
                json!(opts)
            }
        };
        (command_line(tokens), options)
    }

    /// Rebuild a request from its decoded arguments (after the mount).
    pub fn decode(op: S3Op, args: Vec<String>, options: Value) -> Result<Self, RemoteError> {
        Ok(match op {
            S3Op::Ls => S3Request::Ls {
                opts: payload(options)?,
                paths: args,
            },
            S3Op::Cp => {
                let p: CpPayload = payload(options)?;
                let mut args = args.into_iter();
                let dst = args
                    .next()
                    .ok_or_else(|| RemoteError::bad_request("cp needs a destination"))?;
                let sources: Vec<String> = args.collect();
                if p.src_is_self.len() != sources.len() {
                    return Err(RemoteError::bad_request(format!(
                        "cp has {} sources but {} self flags",
                        sources.len(),
                        p.src_is_self.len()
                    )));
                }
                S3Request::Cp {
                    opts: p.options,
                    dst,
                    sources,
                    src_is_self: p.src_is_self,
                    dst_is_self: p.dst_is_self,
                }
            }
            S3Op::Rm => {
                let p: RmPayload = payload(options)?;
                S3Request::Rm {
                    path: one(args, op)?,
                    recursive: p.recursive,
                }
            }
            S3Op::Fstat => {
                let p: FstatPayload = payload(options)?;
                S3Request::Fstat {
                    path: one(args, op)?,
                    with_data: p.with_data,
                    enoent_ok: p.enoent_ok,
                }
            }
            S3Op::Fslice => {
                let p: SlicePayload = payload(options)?;
                S3Request::Fslice {
                    path: one(args, op)?,
                    offset: p.offset,
                    length: p.length,
                }
            }
            S3Op::Fwrite => {
                let p: WritePayload = payload(options)?;
                let data = B64
                    .decode(p.data.as_bytes())
                    .map_err(|e| RemoteError::bad_request(format!("bad fwrite data: {e}")))?;
                S3Request::Fwrite {
                    path: one(args, op)?,
                    data,
                }
            }
            S3Op::Mkdir => S3Request::Mkdir {
                path: one(args, op)?,
            },
            S3Op::Rmdir => S3Request::Rmdir {
                path: one(args, op)?,
            },
            S3Op::Grep => {
                let mut args = args.into_iter();
                let pattern = args
                    .next()
                    .ok_or_else(|| RemoteError::bad_request("grep needs a pattern"))?;
                S3Request::Grep {
                    opts: payload(options)?,
                    pattern,
                    paths: args.collect(),
                }
            }
            S3Op::Gzip => S3Request::Gzip {
                opts: payload(options)?,
                paths: args,
            },
            S3Op::Gunzip => S3Request::Gunzip {
                opts: payload(options)?,
                paths: args,
            },
        })
    }
}

/// Any command the dispatcher understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    /// Operation on the object-storage backend mounted at `mount`.
    S3 { mount: String, request: S3Request },
    /// Native fetch on behalf of a sandboxed caller.
    Fetch { url: String, opts: FetchOptions },
}

impl RemoteCommand {
    /// Parse a command line and its options payload.
    pub fn parse(line: &str, options: Value) -> Result<Self, RemoteError> {
        let mut tokens = tokenize(line)?.into_iter();
        let head = tokens
            .next()
            .ok_or_else(|| RemoteError::bad_request("empty command"))?;
        match head.as_str() {
            "vfs-s3" => {
                let op_name = tokens
                    .next()
                    .ok_or_else(|| RemoteError::bad_request("vfs-s3 needs an operation"))?;
                let op: S3Op = op_name
                    .parse()
                    .map_err(|_| RemoteError::bad_request(format!("unknown vfs-s3 op {op_name}")))?;
                let mount = tokens
                    .next()
                    .ok_or_else(|| RemoteError::bad_request("vfs-s3 needs a mount path"))?;
                let request = S3Request::decode(op, tokens.collect(), options)?;
                Ok(RemoteCommand::S3 { mount, request })
            }
            "fetch" => {
                let url = tokens
                    .next()
                    .ok_or_else(|| RemoteError::bad_request("fetch needs a url"))?;
                Ok(RemoteCommand::Fetch {
                    url,
                    opts: payload(options)?,
                })
            }
            other => Err(RemoteError::bad_request(format!("unknown command {other}"))),
        }
    }

    /// Render as a command line plus options payload.
    pub fn encode(&self) -> (String, Value) {
        match self {
            RemoteCommand::S3 { mount, request } => request.encode(mount),
            RemoteCommand::Fetch { url, opts } => (command_line(["fetch", url.as_str()]), json!(opts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_are_encoded() {
        let req = S3Request::Ls {
            opts: LsOptions::default(),
            paths: vec!["/s3/minio/my bucket/a b.txt".into()],
        };
        let (line, _) = req.encode("/s3/minio");
        assert_eq!(
            line,
            "vfs-s3 ls %2Fs3%2Fminio %2Fs3%2Fminio%2Fmy%20bucket%2Fa%20b.txt"
        );
        assert_eq!(line.split_whitespace().count(), 4);
    }

    #[test]
    fn test_cp_round_trip_through_parse() {
        let req = S3Request::Cp {
            opts: CopyOptions {
                public_read: true,
                recursive: false,
            },
            dst: "/local/out dir".into(),
            sources: vec!["/s3/m/b/k1".into(), "/s3/m/b/k2".into()],
            src_is_self: vec![true, true],
            dst_is_self: false,
        };
        let (line, options) = req.encode("/s3/m");
        assert_eq!(options["srcIsSelf"], json!([true, true]));
        match RemoteCommand::parse(&line, options).unwrap() {
            RemoteCommand::S3 { mount, request } => {
                assert_eq!(mount, "/s3/m");
                assert_eq!(request, req);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fwrite_payload_is_base64() {
        let req = S3Request::Fwrite {
            path: "/s3/m/b/k".into(),
            data: vec![0, 159, 146, 150],
        };
        let (line, options) = req.encode("/s3/m");
        assert_eq!(options["data"], "AJ+Slg==");
        let back = RemoteCommand::parse(&line, options).unwrap();
        assert!(matches!(back, RemoteCommand::S3 { request: S3Request::Fwrite { data, .. }, .. } if data == vec![0, 159, 146, 150]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RemoteCommand::parse("", Value::Null).is_err());
        assert!(RemoteCommand::parse("vfs-s3 explode /s3/m", Value::Null).is_err());
        assert!(RemoteCommand::parse("vfs-s3 rm /s3/m", Value::Null).is_err());
        assert!(RemoteCommand::parse("teleport x", Value::Null).is_err());
        let err = RemoteCommand::parse("vfs-s3 cp /s3/m /dst /a", json!({"srcIsSelf": []})).unwrap_err();
        assert!(err.message.contains("self flags"));
    }

    #[test]
    fn test_fetch_line() {
        assert!(RemoteCommand::parse("vfs ls %2F", Value::Null).is_err());

        let (line, _) = RemoteCommand::Fetch {
            url: "https://example.com/a?b=c".into(),
            opts: FetchOptions::default(),
        }
        .encode();
        assert_eq!(line, "fetch https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc");
    }
}
