use std::fmt;

use percent_encoding::percent_decode_str;

use crate::Config;

macro_rules! writeok {
    ($dst:expr, $($arg:tt)*) => {
        let _ = fmt::Write::write_fmt(&mut $dst, format_args!($($arg)*));
    }
}

fn basic_credentials(config: &Config) -> Option<String> {
    let url = config.url();
    if url.username().is_empty() && url.password().is_none() {
        return None;
    }

    let user = percent_decode_str(url.username()).decode_utf8_lossy();
    let password = percent_decode_str(url.password().unwrap_or_default()).decode_utf8_lossy();
    let credentials = format!("{}:{}", user, password);
    Some(base64::encode_config(credentials.as_bytes(), base64::STANDARD))
}

/// Builds the HTTP `Connection: Upgrade` request that opens the connection.
pub(crate) fn build_request(config: &Config, key: &str) -> String {
    let url = config.url();
    let mut s = String::new();
    writeok!(s, "GET {path}", path = url.path());
    if let Some(query) = url.query() {
        writeok!(s, "?{query}", query = query);
    }

    s += " HTTP/1.1\r\n";

    if let Some(host) = url.host() {
        writeok!(s, "Host: {host}", host = host);
        if let Some(port) = url.port() {
            writeok!(s, ":{port}", port = port);
        }

        s += "\r\n";
    }

    writeok!(
        s,
        "Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {version}\r\n",
        key = key,
        version = config.protocol().version()
    );

    if let Some(credentials) = basic_credentials(config) {
        writeok!(s, "Authorization: Basic {credentials}\r\n", credentials = credentials);
    }

    for (name, value) in config.headers() {
        writeok!(s, "{name}: {value}\r\n", name = name, value = value);
    }

    s += "\r\n";
    s
}

#[cfg(test)]
mod tests {
    use bolt_codec::ProtocolVersion;

    use crate::request::build_request;
    use crate::ClientBuilder;

    static REQUEST: &str = "GET /stream?query HTTP/1.1\r\n\
                            Host: localhost:8000\r\n\
                            Upgrade: websocket\r\n\
                            Connection: Upgrade\r\n\
                            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                            Sec-WebSocket-Version: 13\r\n\
                            \r\n";

    #[test]
    fn builds_request() {
        let config = ClientBuilder::new("ws://localhost:8000/stream?query").unwrap().build();
        assert_eq!(REQUEST, build_request(&config, "dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn omits_default_port() {
        let config = ClientBuilder::new("wss://example.com:443").unwrap().build();
        let request = build_request(&config, "key");
        assert!(request.starts_with("GET / HTTP/1.1\r\nHost: example.com\r\n"), "{}", request);
    }

    #[test]
    fn sends_credentials_and_headers() {
        let config = ClientBuilder::new("ws://user:p%40ss@example.com/chat")
            .unwrap()
            .origin("http://example.com")
            .unwrap()
            .protocol(ProtocolVersion::Hybi10)
            .build();

        let request = build_request(&config, "key");
        // base64("user:p@ss")
        assert!(request.contains("Authorization: Basic dXNlcjpwQHNz\r\n"), "{}", request);
        assert!(request.contains("Sec-WebSocket-Version: 8\r\n"), "{}", request);
        assert!(request.ends_with("Origin: http://example.com\r\n\r\n"), "{}", request);
    }
}
