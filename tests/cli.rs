//! End-to-end runs of the `sharpness` binary.

use anyhow::{Context, Result, ensure};
use std::{fs, path::PathBuf, process::Command};

fn scratch_dir(name: &str) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("hessian-lanczos-cli-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn sharpness(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sharpness"));
    cmd.args([
        "--samples",
        "40",
        "--input-dim",
        "3",
        "--outputs",
        "2",
        "--hidden",
        "4",
        "--batch-size",
        "8",
        "--seed",
        "5",
    ])
    .args(args)
    .env("RUST_LOG", "info");
    cmd
}

#[test]
fn test_unwritable_output_fails_before_training() -> Result<()> {
    let dir = scratch_dir("unwritable")?;
    let blocker = dir.join("plain-file");
    fs::write(&blocker, b"x")?;
    let output = blocker.join("results.csv");

    let run = sharpness(&["--epochs", "50", "--output", output.to_str().context("utf-8 path")?])
        .output()
        .context("failed to launch the sharpness binary")?;
    let stderr = String::from_utf8_lossy(&run.stderr);

    ensure!(!run.status.success(), "an unwritable output path was accepted");
    ensure!(
        !stderr.contains("epoch 1:"),
        "training ran before the output was opened:\n{stderr}"
    );
    fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn test_adam_run_writes_every_epoch() -> Result<()> {
    let dir = scratch_dir("adam")?;
    let output = dir.join("out").join("results.csv");

    let run = sharpness(&[
        "--optimizer",
        "adam",
        "--lr",
        "0.01",
        "--epochs",
        "3",
        "--output",
        output.to_str().context("utf-8 path")?,
    ])
    .output()
    .context("failed to launch the sharpness binary")?;
    let stderr = String::from_utf8_lossy(&run.stderr);
    ensure!(run.status.success(), "run failed:\n{stderr}");
    ensure!(
        stderr.contains("Best test accuracy"),
        "the best test accuracy was not reported:\n{stderr}"
    );

    let mut reader = csv::Reader::from_path(&output)?;
    let epochs: Vec<usize> = reader
        .records()
        .map(|r| -> Result<usize> { Ok(r?[0].parse::<usize>()?) })
        .collect::<Result<_>>()?;
    ensure!(epochs == vec![1, 2, 3], "unexpected epochs {epochs:?}");
    fs::remove_dir_all(&dir)?;
    Ok(())
}
