//! Shared fixtures: shell-script stand-ins for the wrapped tools and small
//! input corpora.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Fake `rellic` whose behaviour is chosen by the first word of the input
/// file. Answers `--version` like the real tool.
pub const FAKE_RELLIC: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "rellic-decomp version 11.0 (fake)"
  exit 0
fi
while [ $# -gt 0 ]; do
  case "$1" in
    -input) in="$2"; shift ;;
    -output) out="$2"; shift ;;
  esac
  shift
done
mode=$(head -n 1 "$in" | cut -d' ' -f1)
case "$mode" in
  ok)
    cp "$in" "$out" ;;
  empty)
    : > "$out" ;;
  segv)
    echo "Stack dump:" >&2
    kill -SEGV $$ ;;
  fatal)
    echo "I1019 starting" >&2
    echo "F1019 12:00:01 ASTBuilder.cpp:311] Check failed: decl" >&2
    kill -ABRT $$ ;;
  abort)
    kill -ABRT $$ ;;
  asan)
    echo "=================================================================" >&2
    echo "==1==ERROR: AddressSanitizer: heap-use-after-free on address 0x602" >&2
    echo "    #0 0x4f in emit /src/lib/foo.c:42:7" >&2
    echo "SUMMARY: AddressSanitizer: heap-use-after-free /src/lib/foo.c:42 in emit" >&2
    exit 1 ;;
  assert)
    echo "rellic: something went wrong" >&2
    exit 1 ;;
  exit3)
    exit 3 ;;
  hang)
    sleep 30 ;;
  *)
    echo "unknown mode $mode" >&2
    exit 9 ;;
esac
"#;

/// Write an executable script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

pub fn fake_rellic(dir: &Path) -> PathBuf {
    write_script(dir, "fake-rellic", FAKE_RELLIC)
}

/// Populate `root` with `(relative path, contents)` pairs.
pub fn corpus(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create corpus dir");
        }
        fs::write(&path, contents).expect("write corpus file");
    }
}

/// Number of entries left in a directory (0 if it does not exist).
pub fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
