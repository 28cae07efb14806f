//! AWS credential profiles stored in `credential.yaml`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::{Deserialize, Serialize};

use crate::config::{config_dir, ensure_config_dir, write_private_file};

/// The credential file inside the configuration directory.
pub const CREDENTIAL_FILE: &str = "credential.yaml";
/// Profile used when none is given on the command line.
pub const DEFAULT_PROFILE: &str = "default_profile";

/// One named set of S3 settings. Every field is optional on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialProfile {
    /// AWS access key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_access_key: Option<String>,
    /// AWS secret access key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_key: Option<String>,
    /// AWS region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Target bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Key prefix within the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// A partial update; `None` fields are left untouched.
pub type ProfileUpdate = CredentialProfile;

/// All profiles by name.
pub type Credentials = BTreeMap<String, CredentialProfile>;

fn is_present(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.is_empty())
}

impl CredentialProfile {
    /// Overwrite the fields that `update` sets.
    pub fn merge(&mut self, update: ProfileUpdate) {
        let ProfileUpdate {
            aws_access_key,
            aws_secret_key,
            region,
            bucket,
            prefix,
        } = update;
        let fields = [
            (&mut self.aws_access_key, aws_access_key),
            (&mut self.aws_secret_key, aws_secret_key),
            (&mut self.region, region),
            (&mut self.bucket, bucket),
            (&mut self.prefix, prefix),
        ];
        for (slot, value) in fields {
            if value.is_some() {
                *slot = value;
            }
        }
    }
}

/// Problems with the stored credentials that callers may want to tell apart.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialError {
    /// Nothing has been configured yet.
    #[error("No credential file at {0}; run `cli-onprem s3-share init-credential` first")]
    MissingFile(Utf8PathBuf),
    /// The profile is not in the file.
    #[error("Profile '{0}' does not exist")]
    MissingProfile(String),
    /// The profile lacks an access key or secret key.
    #[error("Profile '{0}' has no AWS credentials (aws_access_key, aws_secret_key)")]
    MissingAwsKeys(String),
    /// The profile lacks a bucket.
    #[error("Profile '{0}' has no bucket configured")]
    MissingBucket(String),
}

/// Which fields [`CredentialStore::get_profile`] insists on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Require {
    /// Both AWS keys must be set.
    pub aws: bool,
    /// The bucket must be set.
    pub bucket: bool,
}

/// The credential file of one configuration directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: Utf8PathBuf,
    path: Utf8PathBuf,
}

impl CredentialStore {
    /// The store inside `dir`.
    pub fn open(dir: impl Into<Utf8PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CREDENTIAL_FILE);
        Self { dir, path }
    }

    /// The store inside the default configuration directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(config_dir()?))
    }

    /// Path of the credential file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// All profiles; a missing or empty file has none.
    #[context("Loading credentials from {}", self.path)]
    pub fn load(&self) -> Result<Credentials> {
        if !self.path.exists() {
            return Ok(Credentials::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Credentials::new());
        }
        let creds: Option<Credentials> = serde_yaml::from_str(&contents)?;
        Ok(creds.unwrap_or_default())
    }

    /// Replace the file with `creds`, owner-readable only.
    #[context("Saving credentials to {}", self.path)]
    pub fn save(&self, creds: &Credentials) -> Result<()> {
        ensure_config_dir(&self.dir)?;
        let contents = serde_yaml::to_string(creds)?;
        write_private_file(&self.path, &contents)?;
        tracing::debug!("Wrote {} profile(s) to {}", creds.len(), self.path);
        Ok(())
    }

    /// Whether `name` is stored.
    pub fn profile_exists(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(name))
    }

    /// Stored profile names, sorted.
    pub fn list_profiles(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Fetch `name`, checking the fields `require` asks for. Failures are
    /// [`CredentialError`]s inside the returned error.
    pub fn get_profile(&self, name: &str, require: Require) -> Result<CredentialProfile> {
        if !self.path.exists() {
            return Err(CredentialError::MissingFile(self.path.clone()).into());
        }
        let profile = self
            .load()?
            .remove(name)
            .ok_or_else(|| CredentialError::MissingProfile(name.to_string()))?;
        if require.aws
            && !(is_present(&profile.aws_access_key) && is_present(&profile.aws_secret_key))
        {
            return Err(CredentialError::MissingAwsKeys(name.to_string()).into());
        }
        if require.bucket && !is_present(&profile.bucket) {
            return Err(CredentialError::MissingBucket(name.to_string()).into());
        }
        Ok(profile)
    }

    /// Create `name` or merge `update` into it, then save.
    pub fn create_or_update_profile(&self, name: &str, update: ProfileUpdate) -> Result<()> {
        let mut creds = self.load()?;
        creds.entry(name.to_string()).or_default().merge(update);
        self.save(&creds)
            .with_context(|| format!("Updating profile '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn store() -> Result<(tempfile::TempDir, CredentialStore)> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path())
            .context("non-UTF-8 tempdir")?
            .join(".cli-onprem");
        Ok((td, CredentialStore::open(dir)))
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn credential_error(e: anyhow::Error) -> CredentialError {
        e.downcast::<CredentialError>().unwrap()
    }

    #[test]
    fn test_load_missing_and_empty() -> Result<()> {
        let (_td, store) = store()?;
        assert!(store.load()?.is_empty());
        assert!(store.list_profiles()?.is_empty());
        assert!(!store.profile_exists("x")?);

        ensure_config_dir(&store.dir)?;
        std::fs::write(store.path(), "")?;
        assert!(store.load()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_load_invalid_yaml() -> Result<()> {
        let (_td, store) = store()?;
        ensure_config_dir(&store.dir)?;
        std::fs::write(store.path(), "a: [unclosed\n")?;
        let e = store.load().unwrap_err();
        assert!(format!("{e:#}").contains("Loading credentials"));
        Ok(())
    }

    #[test]
    fn test_save_sets_permissions() -> Result<()> {
        let (_td, store) = store()?;
        store.create_or_update_profile("p", ProfileUpdate::default())?;
        let file_mode = std::fs::metadata(store.path())?.permissions().mode();
        let dir_mode = std::fs::metadata(&store.dir)?.permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);
        Ok(())
    }

    #[test]
    fn test_get_profile_errors() -> Result<()> {
        let (_td, store) = store()?;
        let e = credential_error(store.get_profile("test", Require::default()).unwrap_err());
        assert!(matches!(e, CredentialError::MissingFile(_)));
        assert!(e.to_string().contains("init-credential"));

        let mut creds = Credentials::new();
        creds.insert(
            "regional".into(),
            CredentialProfile {
                region: some("us-east-1"),
                ..Default::default()
            },
        );
        creds.insert(
            "keys".into(),
            CredentialProfile {
                aws_access_key: some("AKIATEST"),
                aws_secret_key: some("secret"),
                ..Default::default()
            },
        );
        store.save(&creds)?;

        let e = credential_error(store.get_profile("nope", Require::default()).unwrap_err());
        assert_eq!(e, CredentialError::MissingProfile("nope".into()));

        let require_aws = Require {
            aws: true,
            bucket: false,
        };
        let e = credential_error(store.get_profile("regional", require_aws).unwrap_err());
        assert_eq!(e, CredentialError::MissingAwsKeys("regional".into()));

        let require_bucket = Require {
            aws: false,
            bucket: true,
        };
        let e = credential_error(store.get_profile("keys", require_bucket).unwrap_err());
        assert_eq!(e, CredentialError::MissingBucket("keys".into()));

        // Without requirements anything stored is returned as-is
        let p = store.get_profile("regional", Require::default())?;
        assert_eq!(p.region.as_deref(), Some("us-east-1"));
        assert_eq!(p.aws_access_key, None);
        Ok(())
    }

    #[test]
    fn test_get_profile_success() -> Result<()> {
        let (_td, store) = store()?;
        let full = CredentialProfile {
            aws_access_key: some("AKIATEST"),
            aws_secret_key: some("secret123"),
            region: some("us-west-2"),
            bucket: some("my-bucket"),
            prefix: None,
        };
        store.create_or_update_profile("test", full.clone())?;
        let got = store.get_profile(
            "test",
            Require {
                aws: true,
                bucket: true,
            },
        )?;
        assert_eq!(got, full);
        Ok(())
    }

    #[test]
    fn test_partial_update_merges() -> Result<()> {
        let (_td, store) = store()?;
        store.create_or_update_profile(
            "existing",
            ProfileUpdate {
                aws_access_key: some("AKIAOLD"),
                aws_secret_key: some("oldsecret"),
                region: some("us-east-1"),
                ..Default::default()
            },
        )?;
        store.create_or_update_profile(
            "existing",
            ProfileUpdate {
                region: some("eu-west-1"),
                bucket: some("new-bucket"),
                ..Default::default()
            },
        )?;
        let creds = store.load()?;
        let p = &creds["existing"];
        assert_eq!(p.aws_access_key.as_deref(), Some("AKIAOLD"));
        assert_eq!(p.region.as_deref(), Some("eu-west-1"));
        assert_eq!(p.bucket.as_deref(), Some("new-bucket"));
        Ok(())
    }

    #[test]
    fn test_list_profiles_sorted() -> Result<()> {
        let (_td, store) = store()?;
        for name in ["zeta", "alpha", "mid"] {
            store.create_or_update_profile(name, ProfileUpdate::default())?;
        }
        assert_eq!(store.list_profiles()?, vec!["alpha", "mid", "zeta"]);
        assert!(store.profile_exists("mid")?);
        Ok(())
    }

    #[test]
    fn test_on_disk_format() -> Result<()> {
        let (_td, store) = store()?;
        store.create_or_update_profile(
            DEFAULT_PROFILE,
            ProfileUpdate {
                bucket: some("b"),
                ..Default::default()
            },
        )?;
        let contents = std::fs::read_to_string(store.path())?;
        similar_asserts::assert_eq!(contents, "default_profile:\n  bucket: b\n".to_string());
        Ok(())
    }
}
