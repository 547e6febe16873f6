use dialoguer::Confirm;
use std::path::Path;

/// Ask before replacing an existing client bundle. Defaults to "no".
pub fn confirm_overwrite(bundle_dir: &Path) -> Result<bool, anyhow::Error> {
    let confirmed = Confirm::new()
        .with_prompt(format!(
            "A client bundle already exists at {}. Overwrite it?",
            bundle_dir.display()
        ))
        .default(false)
        .interact()?;
    Ok(confirmed)
}
