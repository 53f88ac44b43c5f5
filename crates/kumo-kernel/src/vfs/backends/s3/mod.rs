//! Object-storage backends.
//!
//! One provider yields one mount at `/s3/<name>`. Two backends implement
//! [`VfsOps`](crate::vfs::VfsOps) over the same [`StorageMount`]:
//!
//! - [`StorageResponder`]: talks to the object store directly (native).
//! - [`StorageForwarder`]: re-issues every operation as a `vfs-s3` remote
//!   command (sandboxed).
//!
//! Paths below the mount read `<bucket>/<key>`.

mod forwarder;
mod parallel;
pub mod path;
mod responder;

pub use forwarder::StorageForwarder;
pub use responder::StorageResponder;

use kumo_types::MountIdentity;

/// Namespace root for object-storage mounts.
pub const S3_ROOT: &str = "/s3";

/// Mount identity shared by the responder and forwarder of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMount {
    name: String,
    identity: MountIdentity,
}

impl StorageMount {
    /// Mount for provider `name`, at `/s3/<name>`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let identity = MountIdentity::object_storage(format!("{S3_ROOT}/{name}"));
        Self { name, identity }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &MountIdentity {
        &self.identity
    }

    pub fn mount_path(&self) -> &str {
        &self.identity.mount_path
    }
}

/// Bucket naming rule a name broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketNameViolation {
    TooShort,
    TooLong,
    Underscore,
    TrailingDash,
    Dot,
    Uppercase,
}

impl std::fmt::Display for BucketNameViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = match self {
            BucketNameViolation::TooShort => "bucket names must be at least 3 characters long",
            BucketNameViolation::TooLong => "bucket names must be at most 63 characters long",
            BucketNameViolation::Underscore => "bucket names must not contain underscores",
            BucketNameViolation::TrailingDash => "bucket names must not end with a dash",
            BucketNameViolation::Dot => "bucket names must not contain dots",
            BucketNameViolation::Uppercase => "bucket names must not contain uppercase letters",
        };
        f.write_str(rule)
    }
}

/// Check a bucket name against the naming rules, first violation wins.
pub fn validate_bucket_name(name: &str) -> Result<(), BucketNameViolation> {
    let len = name.chars().count();
    if len < 3 {
        Err(BucketNameViolation::TooShort)
    } else if len > 63 {
        Err(BucketNameViolation::TooLong)
    } else if name.contains('_') {
        Err(BucketNameViolation::Underscore)
    } else if name.ends_with('-') {
        Err(BucketNameViolation::TrailingDash)
    } else if name.contains('.') {
        Err(BucketNameViolation::Dot)
    } else if name.chars().any(|c| c.is_ascii_uppercase()) {
        Err(BucketNameViolation::Uppercase)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::VfsError;

    #[test]
    fn test_mount_path() {
        let m = StorageMount::new("minio");
        assert_eq!(m.mount_path(), "/s3/minio");
        assert!(!m.identity().is_local);
        assert!(m.identity().kind.is_object_storage());
    }

    #[test]
    fn test_bucket_name_rules() {
        assert_eq!(validate_bucket_name("ab"), Err(BucketNameViolation::TooShort));
        assert_eq!(
            validate_bucket_name(&"a".repeat(64)),
            Err(BucketNameViolation::TooLong)
        );
        assert_eq!(
            validate_bucket_name("Has_Underscore"),
            Err(BucketNameViolation::Underscore)
        );
        assert_eq!(validate_bucket_name("logs-"), Err(BucketNameViolation::TrailingDash));
        assert_eq!(validate_bucket_name("my.logs"), Err(BucketNameViolation::Dot));
        assert_eq!(validate_bucket_name("MyLogs"), Err(BucketNameViolation::Uppercase));
        assert_eq!(validate_bucket_name("my-logs-2024"), Ok(()));
    }

    #[test]
    fn test_messages_name_the_rule() {
        let err = VfsError::InvalidBucketName {
            name: "ab".into(),
            violation: BucketNameViolation::TooShort,
        };
        assert_eq!(
            err.to_string(),
            "invalid bucket name \"ab\": bucket names must be at least 3 characters long"
        );
        assert!(
            BucketNameViolation::Underscore
                .to_string()
                .contains("underscores")
        );
    }
}
