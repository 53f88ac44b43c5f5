//! # kumo-kernel
//!
//! Pluggable virtual filesystem over local disk and S3-compatible object
//! storage, with a remote fetch client and a sandbox bridge.
//!
//! A kernel:
//! - Mounts one backend per path prefix (`/local`, `/s3/<provider>`)
//! - Routes every path operation to the longest matching mount
//! - Negotiates copies between backends
//! - Runs natively with its own storage clients, or sandboxed with every
//!   storage and network call forwarded to a proxy over a line channel
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | [`vfs`]       | Mount table, router, backend contract, backends      |
//! | [`storage`]   | Object-storage client capability                     |
//! | [`fetch`]     | HTTP and cluster fetch with retry and streaming      |
//! | [`kube`]      | Cluster resource URL formatting                      |
//! | [`rexec`]     | Remote command channel, dispatcher, proxy transport  |
//! | [`jobs`]      | Data-parallel job offload                            |
//! | [`providers`] | Provider discovery and client construction           |
//! | [`config`]    | TOML configuration                                   |
//! | [`kernel`]    | Assembly of all of the above                         |

pub mod config;
pub mod fetch;
pub mod glob;
pub mod jobs;
pub mod kernel;
pub mod kube;
pub mod providers;
pub mod rexec;
pub mod storage;
pub mod vfs;

pub use config::{ConfigError, KumoConfig, Mode};
pub use fetch::{
    ExecutionContext, FetchClient, FetchError, FetchKind, FetchOptions, FetchResponse, StreamEvent,
};
pub use kernel::Kernel;
pub use kube::{KindDescriptor, QueryOptions, UrlFormatter};
pub use providers::{ConfigProviders, Provider, ProviderDiscovery};
pub use rexec::{Dispatcher, RemoteError, RemoteExec, serve_lines};
pub use storage::{MemoryObjectStore, ObjectStore};
pub use vfs::{ErrorKind, MountTable, Vfs, VfsError, VfsOps, VfsResult};
