/// Response header helpers: pagination links and HTTP dates
use chrono::{DateTime, NaiveDateTime, Utc};
use url::Url;

/// One entry of an RFC 5988 `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry<'a> {
    pub target: &'a str,
    pub rel: Option<&'a str>,
}

/// Split a `Link` header value into its entries
///
/// Entries look like `<url>; rel="next"`. Commas inside the angle brackets
/// belong to the URL, so the split follows the brackets rather than
/// splitting the whole value on `,`.
pub fn parse_link_header(value: &str) -> Vec<LinkEntry<'_>> {
    let mut entries = Vec::new();
    let mut rest = value;

    while let Some(open) = rest.find('<') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('>') else {
            break;
        };
        let target = after_open[..close].trim();
        let params_and_rest = &after_open[close + 1..];

        // Parameters run until the next entry starts.
        let params_end = params_and_rest.find('<').unwrap_or(params_and_rest.len());
        let params = &params_and_rest[..params_end];

        entries.push(LinkEntry {
            target,
            rel: rel_param(params),
        });
        rest = &params_and_rest[params_end..];
    }

    entries
}

fn rel_param(params: &str) -> Option<&str> {
    params.split(';').find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("rel") {
            Some(value.trim().trim_end_matches(',').trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// Find the `rel="next"` target among one or more `Link` header values
///
/// Relative targets resolve against `base`. Returns `None` at the end of
/// pagination.
pub fn next_page<'a, I>(values: I, base: &Url) -> Option<Url>
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().find_map(|value| {
        parse_link_header(value)
            .into_iter()
            .find(|entry| {
                entry
                    .rel
                    .map(|rel| {
                        rel.split_ascii_whitespace()
                            .any(|r| r.eq_ignore_ascii_case("next"))
                    })
                    .unwrap_or(false)
            })
            .and_then(|entry| base.join(entry.target).ok())
    })
}

/// Parse an HTTP `Date` header
///
/// Accepts the IMF-fixdate form servers send today and the obsolete
/// RFC 850 form.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format an instant as an IMF-fixdate, as used by `If-Unmodified-Since`
pub fn format_http_date(instant: &DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
