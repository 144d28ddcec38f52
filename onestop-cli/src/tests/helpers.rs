//! Test helpers for writing payload files and temporary workspaces.

use camino::{Utf8Path, Utf8PathBuf};
use onestop_core::{ChangeOp, PayloadBody};
use std::fs;
use tempfile::TempDir;

pub(super) fn utf8_workspace() -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 workspace");
    (tmp, root)
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    fs::write(path.as_std_path(), contents).expect("write file");
}

pub(super) fn write_payload(path: &Utf8Path, changes: Vec<ChangeOp>) {
    let json = PayloadBody { changes }.to_json().expect("encode payload");
    write_utf8(path, json.as_bytes());
}
