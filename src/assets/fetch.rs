use std::time::Duration;

use crate::error::{FishreelError, FishreelResult};

/// Fixed timeout for remote image fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking HTTP GET returning the response body.
///
/// Non-2xx statuses are errors; there is no retry policy.
pub fn fetch_bytes(url: &str) -> FishreelResult<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| FishreelError::download(format!("build http client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| FishreelError::download(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FishreelError::download(format!("GET {url}: HTTP {status}")));
    }

    let bytes = response
        .bytes()
        .map_err(|e| FishreelError::download(format!("read body of {url}: {e}")))?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_host_is_a_download_error() {
        let err = fetch_bytes("http://fishreel.invalid/fish.jpg").unwrap_err();
        assert!(matches!(err, FishreelError::Download(_)));
    }
}
