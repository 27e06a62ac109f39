use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::exchanges::crypto_com::Credentials;

/// Reads `api_key:` and `api_sec:` lines from a credentials file.
pub fn read_api_credentials_from_file(file_path: impl AsRef<Path>) -> io::Result<Credentials> {
    let file = File::open(file_path.as_ref())?;
    parse_credentials(BufReader::new(file))
}

fn parse_credentials(reader: impl BufRead) -> io::Result<Credentials> {
    let mut api_key = String::new();
    let mut api_sec = String::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if let Some(value) = line.strip_prefix("api_key:") {
            api_key = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("api_sec:") {
            api_sec = value.trim().to_string();
        }
    }

    if api_key.is_empty() || api_sec.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "credentials file needs both api_key: and api_sec: lines",
        ));
    }
    Ok(Credentials::new(api_key, api_sec))
}
