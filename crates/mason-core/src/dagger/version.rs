use anyhow::{Context, Result, bail};
use tokio::process::Command;

/// Ask the Dagger CLI for its version string.
pub async fn dagger_version(binary: &str) -> Result<String> {
    let output = Command::new(binary)
        .arg("version")
        .env("DAGGER_NO_NAG", "1")
        .output()
        .await
        .with_context(|| format!("failed to execute {binary} version"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{binary} version failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
