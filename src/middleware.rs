use crate::routes::IngestError;

use warp;
use warp::Filter;
use warp::http::Method;
use byte_unit::Byte as ByteSize;
use std::convert::Infallible;
use std::io::prelude::*;
use std::net::SocketAddr;
use bytes::{Buf, BufMut};
use flate2::read::{GzDecoder, DeflateDecoder};
use futures_util::{Stream, TryStreamExt};


#[derive(Debug)]
pub struct UnsupportedCompression;
impl warp::reject::Reject for UnsupportedCompression {}

/// Only lets POST requests through, before anything touches the body
pub fn post_only() -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::method().and_then(|method: Method| async move {
        match method == Method::POST {
            true => Ok(()),
            false => Err(warp::reject::custom(IngestError::MethodNotAllowed)),
        }
    }).untuple_one()
}

/// A request body as text, or why it could not be read as such
pub type DecodedBody = Result<String, String>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn from_header(header: Option<&str>) -> Option<Self> {
        match header {
            None | Some("identity") => Some(ContentEncoding::Identity),
            Some("gzip") => Some(ContentEncoding::Gzip),
            Some("deflate") => Some(ContentEncoding::Deflate),
            Some(_) => None,
        }
    }

    fn decode(self, raw: Vec<u8>, bytes_max: u64) -> Result<Vec<u8>, Unreadable> {
        match self {
            ContentEncoding::Identity => Ok(raw),
            ContentEncoding::Gzip => inflate(GzDecoder::new(&raw[..]), bytes_max),
            ContentEncoding::Deflate => inflate(DeflateDecoder::new(&raw[..]), bytes_max),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Unreadable {
    TooLarge,
    Invalid(&'static str),
}

fn exceeds(length: usize, bytes_max: u64) -> bool {
    bytes_max != 0 && length as u64 > bytes_max
}

/* Reads at most one byte past the limit */
fn inflate(decoder: impl Read, bytes_max: u64) -> Result<Vec<u8>, Unreadable> {
    let cap = match bytes_max {
        0 => u64::MAX,
        limit => limit.saturating_add(1),
    };
    let mut inflated = Vec::new();
    decoder.take(cap).read_to_end(&mut inflated).map_err(|_| Unreadable::Invalid("undecodable body"))?;
    match exceeds(inflated.len(), bytes_max) {
        true => Err(Unreadable::TooLarge),
        false => Ok(inflated),
    }
}

/* The limit holds even without a Content-Length */
async fn read_capped<S, B>(body: S, bytes_max: u64) -> Result<Vec<u8>, Unreadable>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    let mut body = Box::pin(body);
    let mut raw = Vec::new();
    while let Some(chunk) = body.try_next().await.map_err(|_| Unreadable::Invalid("unreadable body"))? {
        if exceeds(raw.len() + chunk.remaining(), bytes_max) {
            return Err(Unreadable::TooLarge);
        }
        raw.put(chunk);
    }
    Ok(raw)
}

async fn decode_body<S, B>(encoding: ContentEncoding, bytes_max: u64, body: S) -> Result<DecodedBody, warp::Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    let decoded = read_capped(body, bytes_max).await
        .and_then(|raw| encoding.decode(raw, bytes_max))
        .and_then(|raw| String::from_utf8(raw).map_err(|_| Unreadable::Invalid("non UTF-8 body")));

    match decoded {
        Ok(text) => Ok(Ok(text)),
        Err(Unreadable::TooLarge) => Err(warp::reject::custom(PayloadTooLarge)),
        Err(Unreadable::Invalid(reason)) => Ok(Err(String::from(reason))),
    }
}

/// Extracts the request body as text, decompressing it as per content-encoding
/// The limit (0 means none) applies to the body as received and once decompressed.
/// Bodies that cannot be read as text are handed over as an error for the route to count.
pub fn compressible_body(size_limit: ByteSize) -> impl Filter<Extract = (DecodedBody, ), Error = warp::Rejection> + Clone {
    let bytes_max = size_limit.as_u64();
    warp::header::optional::<String>("content-encoding")
        .and_then(|encoding: Option<String>| async move {
            ContentEncoding::from_header(encoding.as_deref()).ok_or_else(|| warp::reject::custom(UnsupportedCompression))
        })
        .and(warp::any().map(move || bytes_max))
        .and(warp::body::stream())
        .and_then(decode_body)
}


#[derive(Debug)]
pub struct PayloadTooLarge;
impl warp::reject::Reject for PayloadTooLarge {}

/// Refuses requests announcing a body larger than the limit (0 means no limit)
pub fn content_length_filter(size_limit: ByteSize) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::header::optional("content-length").and_then(move |length: Option<u64>| async move {
        let bytes_max = size_limit.as_u64();
        match length {
            Some(length) if bytes_max != 0 && length > bytes_max => Err(warp::reject::custom(PayloadTooLarge)),
            _ => Ok(())
        }
    }).untuple_one()
}


/// CORS for the beacon script: any origin when none are configured
pub fn cors(origins: &Vec<String>) -> warp::cors::Builder {
    let cors = warp::cors()
        .allow_methods(&[Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(["content-type", "content-encoding"])
        .allow_credentials(true);

    match origins.is_empty() {
        true => cors.allow_any_origin(),
        false => cors.allow_origins(origins.iter().map(|s| s.as_str())),
    }
}


fn infer_client_ip(x_real_ip: Option<String>, x_forwarded_for: Option<String>, remote_addr: Option<SocketAddr>) -> String {
    let remote_addr = remote_addr.map(|addr| addr.ip().to_string()).unwrap_or(String::from("?"));
    x_real_ip
        .or_else(|| x_forwarded_for.and_then(|forwarded_for| forwarded_for.split(",").next().map(|s| String::from(s.trim()))))
        .unwrap_or(remote_addr)
}

pub fn request_logger(request_info: warp::log::Info) {
    let headers = request_info.request_headers();
    let client_ip = infer_client_ip(
        headers.get("x-real-ip").and_then(|v| v.to_str().map(|s| String::from(s)).ok()),
        headers.get("x-forwarded-for").and_then(|v| v.to_str().map(|s| String::from(s)).ok()),
        request_info.remote_addr()
    );
    let content_length = headers.get("content-length").and_then(|length| length.to_str().ok()).unwrap_or("0");

    log::info!(
        "[request] {} {} {:?} from {} length {} status {} in {:?}",
        request_info.method(),
        request_info.path(),
        request_info.version(),
        client_ip,
        content_length,
        request_info.status().as_u16(),
        request_info.elapsed(),
    );
}


pub async fn handle_rejection(rejection: warp::Rejection) -> Result<warp::reply::Response, Infallible> {
    use warp::Reply;
    log::debug!("rejecting request: {:?}", rejection);

    let response = if let Some(ingest_error) = rejection.find::<IngestError>() {
        ingest_error.to_response()
    } else if rejection.is_not_found() {
        warp::reply::with_status("not found", warp::http::StatusCode::NOT_FOUND).into_response()
    } else if let Some(_) = rejection.find::<warp::reject::MethodNotAllowed>() {
        IngestError::MethodNotAllowed.to_response()
    } else if let Some(PayloadTooLarge) = rejection.find() {
        warp::reply::with_status("KO", warp::http::StatusCode::PAYLOAD_TOO_LARGE).into_response()
    } else if let Some(UnsupportedCompression) = rejection.find() {
        warp::reply::with_status("KO", warp::http::StatusCode::UNSUPPORTED_MEDIA_TYPE).into_response()
    } else if let Some(_) = rejection.find::<warp::cors::CorsForbidden>() {
        warp::reply::with_status("KO", warp::http::StatusCode::FORBIDDEN).into_response()
    } else {
        warp::reply::with_status("KO", warp::http::StatusCode::BAD_REQUEST).into_response()
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let remote = Some(SocketAddr::from(([10, 0, 0, 1], 4242)));
        assert_eq!(infer_client_ip(Some("1.2.3.4".into()), Some("5.6.7.8".into()), remote), "1.2.3.4");
        assert_eq!(infer_client_ip(None, Some("5.6.7.8, 10.0.0.2".into()), remote), "5.6.7.8");
        assert_eq!(infer_client_ip(None, None, remote), "10.0.0.1");
        assert_eq!(infer_client_ip(None, None, None), "?");
    }

    #[tokio::test]
    async fn test_post_only() {
        assert!(warp::test::request().method("POST").matches(&post_only()).await);
        assert!(!warp::test::request().method("GET").matches(&post_only()).await);
        assert!(!warp::test::request().method("PUT").matches(&post_only()).await);
    }

    #[tokio::test]
    async fn test_content_length_filter() {
        let filter = content_length_filter(ByteSize::from_u64(10));
        assert!(warp::test::request().header("content-length", "10").matches(&filter).await);
        assert!(!warp::test::request().header("content-length", "11").matches(&filter).await);
        assert!(warp::test::request().matches(&filter).await);

        let unlimited = content_length_filter(ByteSize::from_u64(0));
        assert!(warp::test::request().header("content-length", "1000000").matches(&unlimited).await);
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_compressible_body() {
        let unlimited = compressible_body(ByteSize::from_u64(0));

        let body = warp::test::request()
            .header("content-encoding", "gzip")
            .body(gzip(b"{\"event\":\"zipped\"}"))
            .filter(&unlimited).await
            .unwrap();
        assert_eq!(body, Ok(String::from("{\"event\":\"zipped\"}")));

        let plain = warp::test::request().body("hello").filter(&unlimited).await.unwrap();
        assert_eq!(plain, Ok(String::from("hello")));

        let brotli = warp::test::request().header("content-encoding", "br").body("x").filter(&unlimited).await;
        assert!(brotli.unwrap_err().find::<UnsupportedCompression>().is_some());

        let not_gzip = warp::test::request().header("content-encoding", "gzip").body("not gzip").filter(&unlimited).await;
        assert_eq!(not_gzip.unwrap(), Err(String::from("undecodable body")));

        let binary = warp::test::request().body(vec![0xff_u8, 0xfe]).filter(&unlimited).await;
        assert_eq!(binary.unwrap(), Err(String::from("non UTF-8 body")));
    }

    #[tokio::test]
    async fn test_body_limit_applies_without_content_length() {
        let filter = compressible_body(ByteSize::from_u64(8));

        let fits = warp::test::request().body("12345678").filter(&filter).await.unwrap();
        assert_eq!(fits, Ok(String::from("12345678")));

        let too_long = warp::test::request().body("123456789").filter(&filter).await;
        assert!(too_long.unwrap_err().find::<PayloadTooLarge>().is_some());
    }

    #[tokio::test]
    async fn test_body_limit_applies_once_inflated() {
        let inflated = vec![b'a'; 64 * 1024];
        let compressed = gzip(&inflated);
        assert!(compressed.len() < 1024);

        let limited = compressible_body(ByteSize::from_u64(1024));
        let bomb = warp::test::request()
            .header("content-encoding", "gzip")
            .body(compressed.clone())
            .filter(&limited).await;
        assert!(bomb.unwrap_err().find::<PayloadTooLarge>().is_some());

        let unlimited = compressible_body(ByteSize::from_u64(0));
        let body = warp::test::request()
            .header("content-encoding", "gzip")
            .body(compressed)
            .filter(&unlimited).await
            .unwrap()
            .unwrap();
        assert_eq!(body.len(), inflated.len());
    }

    #[test]
    fn test_inflate_stops_one_byte_past_the_limit() {
        let compressed = gzip(&[b'z'; 11]);
        assert_eq!(inflate(GzDecoder::new(&compressed[..]), 11), Ok(vec![b'z'; 11]));
        assert_eq!(inflate(GzDecoder::new(&compressed[..]), 10), Err(Unreadable::TooLarge));
    }
}
