//! `s3-share`: manage the S3 credential profiles used for sharing files.

use anyhow::Result;
use dialoguer::{Confirm, Input, Password};
use onprem_utils::Reporter;

use crate::cli::InitCredentialOpts;
use crate::credential::{CredentialStore, ProfileUpdate};

fn prompt(label: &str) -> Result<Option<String>> {
    let v: String = Input::new()
        .with_prompt(label)
        .allow_empty(true)
        .interact_text()?;
    let v = v.trim();
    Ok((!v.is_empty()).then(|| v.to_string()))
}

/// Run `s3-share init-credential`.
pub(crate) fn init_credential(opts: &InitCredentialOpts, reporter: &Reporter) -> Result<()> {
    let store = CredentialStore::open_default()?;
    let profile = opts.profile.as_str();

    if store.profile_exists(profile)? && !opts.overwrite {
        reporter.warning(format!("Profile '{profile}' already exists"));
        let overwrite = Confirm::new()
            .with_prompt("Overwrite it?")
            .default(false)
            .interact()?;
        if !overwrite {
            reporter.warning("Cancelled");
            return Ok(());
        }
    }

    reporter.info(format!("Configuring profile '{profile}'"));
    let aws_access_key = prompt("AWS Access Key")?;
    let aws_secret_key: String = Password::new()
        .with_prompt("AWS Secret Key")
        .allow_empty_password(true)
        .interact()?;
    let update = ProfileUpdate {
        aws_access_key,
        aws_secret_key: (!aws_secret_key.is_empty()).then_some(aws_secret_key),
        region: prompt("Region")?,
        bucket: prompt("Bucket")?,
        prefix: prompt("Prefix")?,
    };
    store.create_or_update_profile(profile, update)?;
    reporter.success(format!(
        "Saved profile '{profile}' to {}",
        store.path()
    ));
    Ok(())
}

/// Run `s3-share list-profiles`.
pub(crate) fn list_profiles(reporter: &Reporter) -> Result<()> {
    let store = CredentialStore::open_default()?;
    let profiles = store.list_profiles()?;
    if profiles.is_empty() {
        reporter.warning(format!(
            "No profiles in {}; run `cli-onprem s3-share init-credential`",
            store.path()
        ));
        return Ok(());
    }
    for p in profiles {
        println!("{p}");
    }
    Ok(())
}
