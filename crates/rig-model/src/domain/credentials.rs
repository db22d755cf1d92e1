use std::fmt;

use serde::{Deserialize, Serialize};

/// Bucket credentials used to sync task directories.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Credentials {
    pub key: String,
    pub secret: String,
    pub bucket: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ec2Key {
    pub name: String,
    pub region: String,
    pub key: String,
    pub secret: String,
}

impl fmt::Debug for Ec2Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ec2Key")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}
