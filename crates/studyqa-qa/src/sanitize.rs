const QUOTES: [char; 3] = ['\'', '"', '`'];

/// Clean up raw model output.
///
/// Splits on `+`, removes every quote character from each part, trims it and
/// joins the parts back with nothing in between. Applying it twice gives the
/// same result as applying it once.
pub fn sanitize_response(input: &str) -> String {
    input
        .split('+')
        .map(|part| part.replace(QUOTES, ""))
        .map(|part| part.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::sanitize_response;

    #[test]
    fn joins_plus_separated_parts() {
        assert_eq!(sanitize_response("\"a + b\""), "ab");
        assert_eq!(sanitize_response("'Hello ' + 'world'"), "Helloworld");
        assert_eq!(sanitize_response("no change"), "no change");
        assert_eq!(sanitize_response(""), "");
    }

    #[test]
    fn quotes_are_stripped_before_trimming() {
        // padding inside quotes goes too; trimming first would keep "a  b"
        assert_eq!(sanitize_response("\"a \" + \" b\""), "ab");
        assert_eq!(sanitize_response("' x '"), "x");
    }

    #[test]
    fn idempotent_and_quote_free() {
        for raw in ["  \"x\" +  y  ", "` + '", "It's a `test` + \" quoted \"", "a+ +b", " ' padded ' "] {
            let once = sanitize_response(raw);
            assert_eq!(sanitize_response(&once), once, "{raw:?}");
            assert!(!once.contains(['\'', '"', '`', '+']), "{once:?}");
        }
    }
}
