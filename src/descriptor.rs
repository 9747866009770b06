//! Inspect descriptor and the steam inspect-link grammar (spec §3, §6).

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// `{ s, a, d, m }` plus the three request-shaping flags from §3.
///
/// Invariant: exactly one of `s, m` is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectDescriptor {
    pub s: u64,
    pub a: u64,
    pub d: u64,
    pub m: u64,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub reply: bool,
    #[serde(default)]
    pub low_priority: bool,
}

impl InspectDescriptor {
    pub fn new(s: u64, a: u64, d: u64, m: u64) -> Result<Self, GatewayError> {
        if (s != 0) == (m != 0) {
            return Err(GatewayError::BadDescriptor(
                "exactly one of s, m must be non-zero".into(),
            ));
        }
        Ok(Self {
            s,
            a,
            d,
            m,
            refresh: false,
            reply: true,
            low_priority: false,
        })
    }

    pub fn is_market(&self) -> bool {
        self.m != 0
    }
}

/// Parse either grammar variant of the steam inspect link (§6):
/// `steam://rungame/730/{steamId}/+csgo_econ_action_preview S{owner}A{asset}D{proof}`
/// or the `M{market}A{asset}D{proof}` variant. Percent-decoding is mandatory;
/// a literal or percent-encoded space before `S`/`M` is both accepted.
pub fn parse_inspect_link(raw: &str) -> Result<InspectDescriptor, GatewayError> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| GatewayError::BadDescriptor(format!("invalid percent-encoding: {e}")))?;

    let marker = "_preview";
    let after_marker = decoded
        .find(marker)
        .map(|idx| &decoded[idx + marker.len()..])
        .ok_or_else(|| GatewayError::BadDescriptor("missing action preview marker".into()))?;
    let tail = after_marker.trim_start();

    let mut chars = tail.char_indices();
    let (_, tag) = chars
        .next()
        .ok_or_else(|| GatewayError::BadDescriptor("empty inspect payload".into()))?;

    let (s, m, rest) = match tag {
        'S' | 's' => {
            let (owner, rest) = take_digits(&tail[1..])?;
            (owner, 0u64, rest)
        }
        'M' | 'm' => {
            let (market, rest) = take_digits(&tail[1..])?;
            (0u64, market, rest)
        }
        other => {
            return Err(GatewayError::BadDescriptor(format!(
                "unexpected tag '{other}', expected S or M"
            )));
        }
    };

    let rest = expect_tag(rest, 'A')?;
    let (asset, rest) = take_digits(rest)?;
    let rest = expect_tag(rest, 'D')?;
    let (proof, _rest) = take_digits(rest)?;

    InspectDescriptor::new(s, asset, proof, m)
}

fn expect_tag(s: &str, tag: char) -> Result<&str, GatewayError> {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.eq_ignore_ascii_case(&tag) => Ok(chars.as_str()),
        Some(c) => Err(GatewayError::BadDescriptor(format!(
            "expected tag '{tag}', found '{c}'"
        ))),
        None => Err(GatewayError::BadDescriptor(format!(
            "expected tag '{tag}', found end of input"
        ))),
    }
}

fn take_digits(s: &str) -> Result<(u64, &str), GatewayError> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return Err(GatewayError::BadDescriptor("expected digits".into()));
    }
    let value: u64 = s[..end]
        .parse()
        .map_err(|_| GatewayError::BadDescriptor("digit run too large".into()))?;
    Ok((value, &s[end..]))
}

/// Render a descriptor back into the `S{..}A{..}D{..}` (or `M` variant) form,
/// unprefixed by the `steam://` scheme — used for round-trip testing (§8)
/// and for building outbound links in the response formatter.
pub fn format_inspect_link(desc: &InspectDescriptor) -> String {
    if desc.is_market() {
        format!("M{}A{}D{}", desc.m, desc.a, desc.d)
    } else {
        format!("S{}A{}D{}", desc.s, desc.a, desc.d)
    }
}
