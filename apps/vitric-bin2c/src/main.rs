//! bin2c: emit a C source file embedding a binary as a byte array.
//!
//! Usage: `bin2c <src-binary> <dst-c-source>`

use std::fmt::Write as _;
use std::process::ExitCode;

fn render(bytes: &[u8]) -> String {
    let mut out = String::from(
        "// This is a generated file; changes may be overwritten.\nconst uint8_t data[] = {",
    );
    for byte in bytes {
        let _ = write!(out, "{byte},");
    }
    out.push_str("};");
    out
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let [_, src_path, dst_path] = args.as_slice() else {
        eprintln!("usage: bin2c <src-binary> <dst-c-source>");
        return ExitCode::FAILURE;
    };

    let bytes = match std::fs::read(src_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("cannot read {src_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(dst_path, render(&bytes)) {
        eprintln!("cannot write {dst_path}: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bytes_as_c_array() {
        assert_eq!(
            render(&[0, 7, 255]),
            "// This is a generated file; changes may be overwritten.\n\
             const uint8_t data[] = {0,7,255,};"
        );
    }

    #[test]
    fn empty_input_renders_empty_array() {
        assert!(render(&[]).ends_with("const uint8_t data[] = {};"));
    }
}
