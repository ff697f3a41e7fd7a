use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::path::Path;

/// Builds a `fimward` command pointed at a config file under `cwd`.
pub fn fimward_cmd(config_path: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("fimward");
    cmd.arg("--config").arg(config_path);
    cmd
}

/// Writes a minimal single-root config file checking `size` and `md5` under
/// `root`, then returns the config file's path.
pub fn write_config(dir: &Path, root: &Path) -> std::path::PathBuf {
    let config_path = dir.join("syscheck.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            scan_on_start = true
            time_secs = 43200

            [[directories]]
            path = "{}"
            size = true
            md5 = true
            "#,
            root.display()
        ),
    )
    .expect("failed to write config fixture");
    config_path
}
