use assert_cmd::cargo; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use tempfile;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// size of a 35 track D64 without error map
const D64_SIZE: usize = 683*256;

fn blank_d64(dir: &tempfile::TempDir) -> Result<std::path::PathBuf,Box<dyn std::error::Error>> {
    let path = dir.path().join("blank.d64");
    let mut dat = vec![0;D64_SIZE];
    // disk ID in the directory header
    let hdr = 357*256;
    dat[hdr+0xa2] = b'A';
    dat[hdr+0xa3] = b'B';
    std::fs::write(&path,dat)?;
    Ok(path)
}

#[test]
fn info_d64() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let path = blank_d64(&dir)?;
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("info")
        .arg("-d").arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"d64\""))
        .stdout(predicate::str::contains("\"_pretty\":\"AB\""));
    Ok(())
}

#[test]
fn convert_then_info() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let src = blank_d64(&dir)?;
    let dst = dir.path().join("blank.g64");
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("convert")
        .arg("-d").arg(&src)
        .arg("-o").arg(&dst)
        .assert()
        .success();
    let bytes = std::fs::read(&dst)?;
    assert!(bytes.starts_with(b"GCR-1541"));
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("info")
        .arg("-d").arg(&dst)
        .arg("--indent").arg("2")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"g64\""))
        .stdout(predicate::str::contains("\"tracks\": 42"))
        .stdout(predicate::str::contains("\"_pretty\": \"AB\""));
    Ok(())
}

#[test]
fn convert_needs_sector_image() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let src = blank_d64(&dir)?;
    let g64 = dir.path().join("first.g64");
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("convert").arg("-d").arg(&src).arg("-o").arg(&g64)
        .assert()
        .success();
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("convert").arg("-d").arg(&g64).arg("-o").arg(dir.path().join("second.g64"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("source must be a sector image"));
    Ok(())
}

#[test]
fn dump_track() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let path = blank_d64(&dir)?;
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("dump")
        .arg("-d").arg(&path)
        .arg("-t").arg("18")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("0000 : FF FF FF FF FF 52"))
        .stderr(predicate::str::contains("7142 bytes"));
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("dump")
        .arg("-d").arg(&path)
        .arg("-t").arg("43")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn unknown_image() -> STDRESULT {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("junk.d64");
    std::fs::write(&path,vec![0;1000])?;
    let mut cmd = cargo::cargo_bin_cmd!("gcr1541");
    cmd.arg("info")
        .arg("-d").arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot match any image format"));
    Ok(())
}
