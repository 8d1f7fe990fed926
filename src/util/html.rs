use std::borrow::Cow;

/// Elements whose boundaries start a new paragraph when flattening HTML.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "tr",
    "pre", "hr", "section", "article",
];

/// Elements whose contents are dropped entirely.
const SKIPPED_TAGS: &[&str] = &["script", "style", "iframe", "noscript", "template"];

/// Reduces untrusted HTML to plain-text paragraphs.
///
/// Episode descriptions arrive as publisher HTML. Rather than injecting that
/// markup into our pages, tags are removed, block-level boundaries become
/// paragraph breaks, `script`/`style`-like elements are dropped with their
/// contents, and common character references are decoded. Whitespace inside a
/// paragraph is collapsed and empty paragraphs are omitted.
///
/// The result is plain text. Templates escape it on output.
pub fn html_to_paragraphs(html: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        current.push_str(&decode_entities(&rest[..lt]));
        let after = &rest[lt + 1..];

        // HTML comments may contain '>'
        if let Some(comment) = after.strip_prefix("!--") {
            rest = match comment.find("-->") {
                Some(end) => &comment[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = after.find('>') else {
            // Unterminated tag: treat the remainder as markup and stop
            rest = "";
            break;
        };
        let tag = &after[..gt];
        rest = &after[gt + 1..];

        let closing = tag.starts_with('/');
        let name = tag_name(tag);

        if !closing && SKIPPED_TAGS.contains(&name.as_str()) && !tag.ends_with('/') {
            rest = skip_element(rest, &name);
            continue;
        }

        if BLOCK_TAGS.contains(&name.as_str()) {
            flush(&mut paragraphs, &mut current);
        }
    }

    current.push_str(&decode_entities(rest));
    flush(&mut paragraphs, &mut current);
    paragraphs
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Returns the input following the closing tag of `name`, or "" if it never closes.
fn skip_element<'a>(rest: &'a str, name: &str) -> &'a str {
    let needle = format!("</{name}");
    let lower = rest.to_ascii_lowercase();
    match lower.find(&needle) {
        Some(start) => match rest[start..].find('>') {
            Some(gt) => &rest[start + gt + 1..],
            None => "",
        },
        None => "",
    }
}

fn flush(paragraphs: &mut Vec<String>, current: &mut String) {
    let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        paragraphs.push(collapsed);
    }
    current.clear();
}

fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).filter(|c| !c.is_control() || c.is_whitespace());
    }

    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "rsquo" => '\u{2019}',
        "lsquo" => '\u{2018}',
        "rdquo" => '\u{201d}',
        "ldquo" => '\u{201c}',
        _ => return None,
    };
    Some(c)
}
