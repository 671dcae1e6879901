pub mod api;
pub mod coordinator;
pub mod model;
pub mod resolve;
pub mod sensor;

pub use api::Error;

use reqwest::Url;

/// Validate a configured host string: trailing slashes are dropped, and the
/// result must carry both a scheme and a network location. Anything else is
/// rejected before a single request is made.
pub fn validate_host(host: &str) -> Result<Url, Error> {
    let trimmed = host.trim_end_matches('/');
    let url =
        Url::parse(trimmed).map_err(|e| Error::InvalidHost(format!("{}: {}", trimmed, e)))?;
    if url.host_str().is_none() {
        return Err(Error::InvalidHost(format!(
            "{}: no network location",
            trimmed
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_with_scheme_and_location_are_accepted() {
        let url = validate_host("http://daytopper.local").unwrap();

        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("daytopper.local"));
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let url = validate_host("http://192.168.1.50//").unwrap();

        assert_eq!(url.as_str(), "http://192.168.1.50/");
    }

    #[test]
    fn hosts_without_a_scheme_are_rejected() {
        assert!(matches!(
            validate_host("daytopper.local"),
            Err(Error::InvalidHost(_))
        ));
    }

    #[test]
    fn urls_without_a_network_location_are_rejected() {
        assert!(matches!(
            validate_host("unix:/run/daytopper.sock"),
            Err(Error::InvalidHost(_))
        ));
    }
}
