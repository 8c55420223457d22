// SPDX-License-Identifier: GPL-3.0-only

//! `cryptsetup` calls; passphrases always travel over stdin (`--key-file -`)

use tar2disk_types::EncryptionSpec;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

pub fn format(runner: &dyn CommandRunner, spec: &EncryptionSpec, device: &str) -> Result<()> {
    let mut invocation = Invocation::admin("cryptsetup").args([
        "--type",
        spec.luks_type.as_str(),
        "--uuid",
        spec.volume_uuid.as_str(),
        "--force-password",
        "--key-file",
        "-",
    ]);

    let key_size = spec.key_size.map(|size| size.to_string());
    for (option, value) in [
        ("--hash", spec.hash.as_deref()),
        ("--cipher", spec.cipher.as_deref()),
        ("--key-size", key_size.as_deref()),
        ("--integrity", spec.integrity_alg.as_deref()),
        ("--pbkdf", spec.pbkdf.as_deref()),
    ] {
        if let Some(value) = value {
            invocation = invocation.args([option, value]);
        }
    }

    let invocation = invocation
        .args(["luksFormat", device])
        .stdin(spec.passphrase.as_str());
    runner.run(&invocation)?;
    Ok(())
}

/// Unlock `device` as `/dev/mapper/<name>`
pub fn open(
    runner: &dyn CommandRunner,
    device: &str,
    name: &str,
    passphrase: &str,
) -> Result<String> {
    let invocation = Invocation::admin("cryptsetup")
        .args(["--key-file", "-", "luksOpen", device, name])
        .stdin(passphrase);
    runner.run(&invocation)?;
    Ok(format!("/dev/mapper/{name}"))
}

pub fn close(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    runner.run(&Invocation::admin("cryptsetup").args(["luksClose", name]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    #[test]
    fn format_passes_only_set_options() {
        let spec = EncryptionSpec {
            enabled: true,
            mapper_name: "root_pv_crypt".to_string(),
            volume_uuid: "0b9d4f3c-7c55-4d7e-8b1a-5d0c2e7f9a31".to_string(),
            passphrase: "install".to_string(),
            luks_type: "luks2".to_string(),
            hash: None,
            cipher: Some("aes-xts-plain64".to_string()),
            key_size: Some(512),
            integrity_alg: None,
            pbkdf: Some("argon2id".to_string()),
        };
        let runner = RecordingRunner::new();
        format(&runner, &spec, "/dev/md/dbuild_1").unwrap();

        let commands = runner.commands();
        assert_eq!(
            commands,
            ["cryptsetup --type luks2 --uuid 0b9d4f3c-7c55-4d7e-8b1a-5d0c2e7f9a31 \
              --force-password --key-file - --cipher aes-xts-plain64 --key-size 512 \
              --pbkdf argon2id luksFormat /dev/md/dbuild_1"]
        );
        assert!(!commands[0].contains("install"));
    }

    #[test]
    fn open_returns_mapper_device() {
        let runner = RecordingRunner::new();
        let device = open(&runner, "/dev/loop0p2", "crypt", "secret").unwrap();
        assert_eq!(device, "/dev/mapper/crypt");
        assert_eq!(
            runner.commands(),
            ["cryptsetup --key-file - luksOpen /dev/loop0p2 crypt"]
        );
    }
}
