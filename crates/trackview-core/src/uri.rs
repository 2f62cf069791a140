/// Marker separating a run's storage root from the artifact path beneath it.
pub const ARTIFACTS_MARKER: &str = "/artifacts/";

/// Normalize a URI, removing redundant slashes and one trailing slash.
///
/// `normalize("foo://bar///baz/") == "foo://bar/baz"` and
/// `normalize("foo:///bar///baz/") == "foo:/bar/baz"`.
///
/// The two slashes following a scheme colon are kept as the authority separator.
/// A URI that ends in that separator keeps it, so the function is idempotent.
#[must_use]
pub fn normalize(uri: &str) -> String {
    let authority_fixed = collapse_empty_authority(uri);
    let collapsed = collapse_slash_runs(&authority_fixed);
    strip_trailing_slash(collapsed)
}

/// Path of an artifact relative to its `/artifacts/` root, if the URI has one.
#[must_use]
pub fn artifact_path_from_source(source: &str) -> Option<String> {
    let normalized = normalize(source);
    normalized
        .split_once(ARTIFACTS_MARKER)
        .map(|(_, artifact_path)| artifact_path.to_string())
}

// `scheme:///path` -> `scheme:/path`, first occurrence only.
fn collapse_empty_authority(uri: &str) -> String {
    let Some(colon) = uri.find(":///") else {
        return uri.to_string();
    };
    let after = &uri[colon + 1..];
    let slashes = after.len() - after.trim_start_matches('/').len();
    let mut out = String::with_capacity(uri.len());
    out.push_str(&uri[..=colon]);
    out.push('/');
    out.push_str(&after[slashes..]);
    out
}

fn collapse_slash_runs(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    let mut chars = uri.chars().peekable();
    let mut previous: Option<char> = None;

    while let Some(ch) = chars.next() {
        if ch != '/' {
            out.push(ch);
            previous = Some(ch);
            continue;
        }

        let mut run = 1_usize;
        while chars.peek() == Some(&'/') {
            chars.next();
            run += 1;
        }
        out.push_str(if run >= 2 && previous == Some(':') { "//" } else { "/" });
        previous = Some('/');
    }

    out
}

fn strip_trailing_slash(mut uri: String) -> String {
    if uri.ends_with('/') && !uri.ends_with("://") {
        uri.pop();
    }
    uri
}
