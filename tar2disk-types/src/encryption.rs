// SPDX-License-Identifier: GPL-3.0-only

//! LUKS layer between the physical volume and the volume group

use std::fmt;

use serde::{Deserialize, Serialize};

/// Encryption of the volume group's physical volume
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSpec {
    pub enabled: bool,

    /// Name of the opened mapping (`/dev/mapper/<name>`), also the crypttab name
    pub mapper_name: String,

    /// LUKS header UUID
    pub volume_uuid: String,

    #[serde(skip_serializing, default)]
    pub passphrase: String,

    /// LUKS format version, e.g. "luks2"
    pub luks_type: String,

    pub hash: Option<String>,

    pub cipher: Option<String>,

    pub key_size: Option<u32>,

    /// dm-integrity algorithm, luks2 only
    pub integrity_alg: Option<String>,

    /// Key derivation function
    pub pbkdf: Option<String>,
}

impl EncryptionSpec {
    pub fn mapper_device(&self) -> String {
        format!("/dev/mapper/{}", self.mapper_name)
    }

    /// Policy violations of an enabled spec
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.enabled {
            return problems;
        }
        if self.passphrase.is_empty() {
            problems.push("no LUKS passphrase set".to_string());
        }
        if self.integrity_alg.is_some() && self.luks_type != "luks2" {
            problems.push("integrity requires luks_type luks2".to_string());
        }
        problems
    }
}

impl fmt::Debug for EncryptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSpec")
            .field("enabled", &self.enabled)
            .field("mapper_name", &self.mapper_name)
            .field("volume_uuid", &self.volume_uuid)
            .field("passphrase", &"<redacted>")
            .field("luks_type", &self.luks_type)
            .field("hash", &self.hash)
            .field("cipher", &self.cipher)
            .field("key_size", &self.key_size)
            .field("integrity_alg", &self.integrity_alg)
            .field("pbkdf", &self.pbkdf)
            .finish()
    }
}
