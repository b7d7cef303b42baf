use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct Fixture {
    pub name: String,
    pub input: PathBuf,
    pub expected: PathBuf,
}

// Walks root for *.txt files that have an .out sibling.
pub fn fixtures(root: &Path) -> io::Result<Vec<Fixture>> {
    let mut found = Vec::new();
    collect(root, &mut found)?;
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn collect(dir: &Path, out: &mut Vec<Fixture>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(&path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let expected = path.with_extension("out");
        if !expected.exists() {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        out.push(Fixture {
            name,
            input: path,
            expected,
        });
    }
    Ok(())
}

pub fn read_file<P: AsRef<Path>>(path: P) -> String {
    fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.as_ref().display()))
}

pub fn temp_input(tag: &str, contents: &[u8]) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("obrc-{tag}-{}.txt", std::process::id()));
    fs::write(&path, contents)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}
