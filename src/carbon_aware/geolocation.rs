//! IP-based geolocation, used when no zone is given

use crate::carbon_aware::types::Coordinates;
use crate::error::{Error, Result};
use reqwest::Client;
use tracing::debug;

/// Resolve the caller's coordinates from their public IP.
///
/// The endpoint is expected to answer with a plain `"lat,lon"` body, as
/// ipinfo.io's `/loc` does.
pub async fn locate_by_ip(client: &Client, url: &str) -> Result<Coordinates> {
    debug!("Looking up location by IP: {}", url);

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(Error::NetworkError(format!(
            "Geolocation lookup error: {}",
            response.status()
        )));
    }

    let body = response.text().await?;
    let coords = parse_lat_lon(&body)?;

    debug!(
        "Resolved location to lat={}, lon={}",
        coords.latitude, coords.longitude
    );
    Ok(coords)
}

/// Parse a `"lat,lon"` body
pub fn parse_lat_lon(body: &str) -> Result<Coordinates> {
    let trimmed = body.trim();
    let (lat, lon) = trimmed
        .split_once(',')
        .ok_or_else(|| Error::ParseError(format!("expected \"lat,lon\", got {trimmed:?}")))?;

    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| Error::ParseError(format!("invalid coordinate {s:?}: {e}")))
    };

    let (lat, lon) = (parse(lat)?, parse(lon)?);
    Coordinates::new(lat, lon)
        .ok_or_else(|| Error::ParseError(format!("coordinates out of range: {lat},{lon}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_lat_lon() {
        let coords = parse_lat_lon("52.3740,4.8897\n").unwrap();
        assert_eq!(coords.latitude, 52.374);
        assert_eq!(coords.longitude, 4.8897);
    }

    #[test]
    fn test_parse_lat_lon_rejects_garbage() {
        assert!(matches!(parse_lat_lon(""), Err(Error::ParseError(_))));
        assert!(matches!(parse_lat_lon("52.37"), Err(Error::ParseError(_))));
        assert!(matches!(parse_lat_lon("north,east"), Err(Error::ParseError(_))));
        assert!(matches!(parse_lat_lon("123.0,4.0"), Err(Error::ParseError(_))));
    }

    #[tokio::test]
    async fn test_locate_by_ip() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("48.8534,2.3488\n"))
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let coords = locate_by_ip(&client, &format!("{}/loc", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(coords, Coordinates::new(48.8534, 2.3488).unwrap());
    }

    #[tokio::test]
    async fn test_locate_by_ip_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loc"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let client = Client::new();
        let err = locate_by_ip(&client, &format!("{}/loc", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NetworkError(_)));
    }
}
