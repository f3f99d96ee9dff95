/// Splits a script into its plugin-request preamble and its body
///
/// The preamble is a `plugins { ... }` block appearing before any other
/// statement. Both halves keep the original line numbering: the preamble is
/// prefixed with the newlines that precede it and the body has the preamble
/// span blanked out.
use crate::dsl::{tokenize, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSource {
    /// Empty when the script has no leading plugins block
    pub preamble: String,
    pub body: String,
}

pub fn split(source: &str) -> SplitSource {
    match preamble_span(source) {
        Some((start, end)) => {
            let line_offset = source[..start].matches('\n').count();
            let mut preamble = "\n".repeat(line_offset);
            preamble.push_str(&source[start..end]);

            let blanked: String = source[start..end]
                .chars()
                .map(|c| if c == '\n' { '\n' } else { ' ' })
                .collect();
            let body = format!("{}{}{}", &source[..start], blanked, &source[end..]);

            SplitSource { preamble, body }
        }
        None => SplitSource {
            preamble: String::new(),
            body: source.to_string(),
        },
    }
}

/// Byte span of the leading plugins block, if any.
///
/// Sources that do not tokenize are left unsplit so the compiler reports the
/// error against the whole body.
fn preamble_span(source: &str) -> Option<(usize, usize)> {
    let tokens = tokenize(source).ok()?;
    let mut rest = tokens.iter().skip_while(|t| t.is_terminator());

    let first = rest.next()?;
    if !first.is_ident("plugins") {
        return None;
    }
    // Only line breaks may separate `plugins` from its opening brace
    let mut rest = rest.skip_while(|t| t.is_newline());
    if rest.next()?.kind != TokenKind::LBrace {
        return None;
    }

    let mut depth = 1usize;
    for token in rest {
        match token.kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    return Some((first.start, token.end));
                }
            }
            _ => {}
        }
    }
    None
}
