use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use std::str;

use crate::errors::DavError;
use crate::models::FileInfo;

#[derive(Debug, Default)]
struct PropFindResponse {
    href: String,
    displayname: String,
    content_length: Option<i64>,
    last_modified: Option<String>,
    content_type: Option<String>,
    etag: Option<String>,
    is_collection: bool,
}

/// Parses a PROPFIND multistatus body into files and directories.
///
/// Every `<response>` with a 200 propstat is returned, including the entry for
/// the requested resource itself; callers listing a container filter it out
/// with [`is_same_resource`].
pub fn parse_propfind_response(xml_text: &str) -> Result<Vec<FileInfo>, DavError> {
    let mut reader = Reader::from_str(xml_text);
    reader.config_mut().trim_text(true);

    let mut files = Vec::new();
    let mut current_response: Option<PropFindResponse> = None;
    let mut current_element = String::new();
    let mut in_propstat = false;
    let mut in_resourcetype = false;
    let mut status_ok = false;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = get_local_name(&e)?;

                match name.as_str() {
                    "response" => {
                        current_response = Some(PropFindResponse::default());
                        in_resourcetype = false;
                    }
                    "propstat" => {
                        in_propstat = true;
                    }
                    "resourcetype" => {
                        in_resourcetype = true;
                    }
                    "collection" if in_resourcetype => {
                        if let Some(ref mut resp) = current_response {
                            resp.is_collection = true;
                        }
                    }
                    _ => {
                        current_element = name;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| DavError::InvalidResponse {
                        details: format!("Invalid XML text: {}", err),
                    })?
                    .to_string();
                let text = text.trim();

                if text.is_empty() {
                    buf.clear();
                    continue;
                }

                if let Some(ref mut resp) = current_response {
                    match current_element.as_str() {
                        "href" => resp.href = text.to_string(),
                        "displayname" => resp.displayname = text.to_string(),
                        "getcontentlength" => resp.content_length = text.parse().ok(),
                        "getlastmodified" => resp.last_modified = Some(text.to_string()),
                        "getcontenttype" => resp.content_type = Some(text.to_string()),
                        "getetag" => resp.etag = Some(text.to_string()),
                        "status" if in_propstat => {
                            if text.contains(" 200") {
                                status_ok = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = get_local_name_from_end(&e)?;

                match name.as_str() {
                    "response" => {
                        if let Some(resp) = current_response.take() {
                            if status_ok && !resp.href.is_empty() {
                                files.push(into_file_info(resp));
                            }
                        }
                        status_ok = false;
                    }
                    "propstat" => {
                        in_propstat = false;
                    }
                    "resourcetype" => {
                        in_resourcetype = false;
                    }
                    _ => {}
                }

                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }

        buf.clear();
    }

    Ok(files)
}

fn into_file_info(resp: PropFindResponse) -> FileInfo {
    let name = if resp.displayname.is_empty() {
        resp.href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string()
    } else {
        resp.displayname.clone()
    };

    let name = urlencoding::decode(&name)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(name);

    FileInfo {
        path: resp.href,
        name,
        size: if resp.is_collection { 0 } else { resp.content_length.unwrap_or(0) },
        mime_type: resp.content_type.unwrap_or_else(|| {
            if resp.is_collection {
                "httpd/unix-directory".to_string()
            } else {
                "application/octet-stream".to_string()
            }
        }),
        last_modified: parse_http_date(&resp.last_modified.unwrap_or_default()),
        etag: resp.etag.unwrap_or_default(),
        is_directory: resp.is_collection,
    }
}

/// Whether a multistatus href refers to the resource at `request_path`.
/// Servers differ on trailing slashes and percent-encoding, so both are
/// normalised before comparing.
pub fn is_same_resource(href: &str, request_path: &str) -> bool {
    let href_path = match url::Url::parse(href) {
        Ok(absolute) => absolute.path().to_string(),
        Err(_) => href.to_string(),
    };

    normalize_href(&href_path) == normalize_href(request_path)
}

fn normalize_href(path: &str) -> String {
    let decoded = urlencoding::decode(path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| path.to_string());
    decoded.trim_end_matches('/').to_string()
}

fn get_local_name(e: &BytesStart) -> Result<String, DavError> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref()).map_err(|e| DavError::InvalidResponse {
        details: format!("Invalid UTF-8 in element name: {}", e),
    })?;
    Ok(name.to_string())
}

fn get_local_name_from_end(e: &BytesEnd) -> Result<String, DavError> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref()).map_err(|e| DavError::InvalidResponse {
        details: format!("Invalid UTF-8 in element name: {}", e),
    })?;
    Ok(name.to_string())
}

/// Parses the date formats WebDAV servers put in `getlastmodified` and in the
/// HTTP `Date` header.
pub fn parse_http_date(date_str: &str) -> Option<DateTime<Utc>> {
    if date_str.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_rfc3339(date_str)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(date_str, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_listing_with_self_entry_and_children() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/dav/acct/Docs/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>Docs</d:displayname>
                        <d:getetag>"dir-etag"</d:getetag>
                        <d:resourcetype><d:collection/></d:resourcetype>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/dav/acct/Docs/report.txt</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>report.txt</d:displayname>
                        <d:getcontentlength>1024</d:getcontentlength>
                        <d:getlastmodified>Mon, 01 Jan 2024 12:00:00 GMT</d:getlastmodified>
                        <d:getcontenttype>text/plain</d:getcontenttype>
                        <d:getetag>"abc123"</d:getetag>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/dav/acct/Docs/Archive/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:resourcetype><d:collection/></d:resourcetype>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let files = parse_propfind_response(xml).unwrap();
        assert_eq!(files.len(), 3);

        let report = &files[1];
        assert_eq!(report.name, "report.txt");
        assert_eq!(report.size, 1024);
        assert_eq!(report.etag, "\"abc123\"");
        assert!(!report.is_directory);
        let modified = report.last_modified.unwrap();
        assert_eq!((modified.year(), modified.hour()), (2024, 12));

        let archive = &files[2];
        assert_eq!(archive.name, "Archive");
        assert!(archive.is_directory);
        assert_eq!(archive.size, 0);
    }

    #[test]
    fn test_skips_non_200_propstat() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/dav/acct/gone.txt</d:href>
                <d:propstat>
                    <d:prop><d:getetag/></d:prop>
                    <d:status>HTTP/1.1 404 Not Found</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let files = parse_propfind_response(xml).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_decodes_name_from_href() {
        let xml = r#"<?xml version="1.0"?>
        <D:multistatus xmlns:D="DAV:">
            <D:response>
                <D:href>/dav/acct/File%20with%20spaces.pdf</D:href>
                <D:propstat>
                    <D:prop><D:resourcetype/></D:prop>
                    <D:status>HTTP/1.1 200 OK</D:status>
                </D:propstat>
            </D:response>
        </D:multistatus>"#;

        let files = parse_propfind_response(xml).unwrap();
        assert_eq!(files[0].name, "File with spaces.pdf");
        assert_eq!(files[0].mime_type, "application/octet-stream");
    }

    #[test]
    fn test_malformed_xml_is_invalid_response() {
        let result = parse_propfind_response("<d:multistatus xmlns:d=\"DAV:\"><d:response></d:multi>");
        assert!(matches!(result, Err(DavError::InvalidResponse { .. })));
    }

    #[test]
    fn test_is_same_resource() {
        assert!(is_same_resource("/dav/acct/Docs/", "/dav/acct/Docs"));
        assert!(is_same_resource("https://host/dav/acct/My%20Docs/", "/dav/acct/My Docs/"));
        assert!(!is_same_resource("/dav/acct/Docs/a.txt", "/dav/acct/Docs/"));
    }

    #[test]
    fn test_parse_http_date_formats() {
        assert!(parse_http_date("Tue, 29 Jul 2025 01:34:17 GMT").is_some());
        assert!(parse_http_date("2025-07-29T01:34:17Z").is_some());
        assert!(parse_http_date("").is_none());
        assert!(parse_http_date("yesterday").is_none());
    }
}
