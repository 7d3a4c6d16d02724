// HTTP(S) GET over esp_http_client with the bundled CA roots.

use embedded_svc::http::Method;
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{
    Configuration as HttpConfig, EspHttpConnection, FollowRedirectsPolicy,
};
use esp_idf_sys::{esp_err_t, EspError, ESP_ERR_HTTP_EAGAIN};
use updater_core::http::{BodyReader, HttpResponse, HttpTransport, RequestOptions, TransportError};

const RX_BUFFER_SIZE: usize = 1024;

pub struct EspTransport;

/// Response body; owns the connection until it is dropped.
pub struct EspBody {
    conn: EspHttpConnection,
}

impl BodyReader for EspBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Read::read(&mut self.conn, buf).map_err(|e| TransportError::Io(e.to_string()))
    }
}

impl HttpTransport for EspTransport {
    type Body = EspBody;

    fn get(
        &mut self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse<EspBody>, TransportError> {
        let mut conn = EspHttpConnection::new(&HttpConfig {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            timeout: Some(options.timeout),
            follow_redirects_policy: if options.follow_redirects {
                FollowRedirectsPolicy::FollowAll
            } else {
                FollowRedirectsPolicy::FollowNone
            },
            buffer_size: Some(RX_BUFFER_SIZE),
            ..Default::default()
        })
        .map_err(connect_error)?;

        conn.initiate_request(Method::Get, url, &[])
            .map_err(connect_error)?;
        conn.initiate_response().map_err(connect_error)?;

        let status = conn.status();
        let content_length = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        log::debug!("GET {} -> {} ({:?} bytes)", url, status, content_length);

        Ok(HttpResponse {
            status,
            content_length,
            body: EspBody { conn },
        })
    }
}

fn connect_error(err: EspError) -> TransportError {
    if err.code() == ESP_ERR_HTTP_EAGAIN as esp_err_t {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}
