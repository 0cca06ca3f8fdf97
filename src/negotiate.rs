//! `Accept-Encoding` negotiation.

use crate::codec::Encoding;

/// Weight of a token without an explicit `q` parameter, in thousandths.
const DEFAULT_WEIGHT: u16 = 1000;

/// A single coding listed by the client, with its weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    /// The coding token as sent, trimmed.
    pub token: &'a str,
    /// Weight in thousandths (`q=0.5` is 500).
    pub weight: u16,
}

impl Candidate<'_> {
    fn is_wildcard(&self) -> bool {
        self.token == "*"
    }

    fn is_identity(&self) -> bool {
        self.token.eq_ignore_ascii_case("identity")
    }
}

/// Tokenizes an `Accept-Encoding` value into candidates in header order.
///
/// Empty entries are skipped. Entries whose `q` parameter is malformed or out
/// of range are dropped rather than guessed at.
pub fn parse_accept_encoding(header: &str) -> Vec<Candidate<'_>> {
    header
        .split(',')
        .filter_map(|part| {
            let mut params = part.split(';');
            let token = params.next().unwrap_or("").trim();
            if token.is_empty() {
                return None;
            }

            let mut weight = DEFAULT_WEIGHT;
            for param in params {
                let param = param.trim();
                let Some((name, value)) = param.split_once('=') else {
                    continue;
                };
                if name.trim().eq_ignore_ascii_case("q") {
                    weight = parse_weight(value.trim())?;
                }
            }

            Some(Candidate { token, weight })
        })
        .collect()
}

/// Parses a qvalue (`0`, `0.5`, `1.000`) into thousandths.
fn parse_weight(value: &str) -> Option<u16> {
    let q: f32 = value.parse().ok()?;
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    Some((q * 1000.0).round() as u16)
}

/// Picks the best encoding for a request.
///
/// `supported` lists the server's encodings, most preferred first; that order
/// breaks ties between equally weighted codings. Returns `None` when the
/// response should not be compressed, including when the client sent no
/// `Accept-Encoding` at all.
pub fn negotiate(header: Option<&str>, supported: &[Encoding]) -> Option<Encoding> {
    let header = header.map(str::trim).filter(|h| !h.is_empty())?;
    let candidates = parse_accept_encoding(header);

    let wildcard = candidates.iter().find(|c| c.is_wildcard()).map(|c| c.weight);
    let identity = candidates.iter().find(|c| c.is_identity()).map(|c| c.weight);

    let mut best: Option<(Encoding, u16)> = None;
    for &encoding in supported {
        let listed = candidates
            .iter()
            .find(|c| Encoding::from_token(c.token) == Some(encoding))
            .map(|c| c.weight);

        // An explicit listing (including q=0) always overrides the wildcard
        let Some(weight) = listed.or(wildcard) else {
            continue;
        };
        if weight == 0 {
            continue;
        }

        // `supported` is walked in preference order, so only a strictly
        // higher weight displaces the current pick
        if best.is_none_or(|(_, best_weight)| weight > best_weight) {
            best = Some((encoding, weight));
        }
    }

    let (encoding, weight) = best?;
    if identity.is_some_and(|identity| identity > weight) {
        return None;
    }
    Some(encoding)
}
