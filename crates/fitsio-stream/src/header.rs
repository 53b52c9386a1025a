//! FITS header card encoding, decoding and the CONTINUE long-string convention.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use crate::block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, HEADER_PAD_BYTE};
use crate::error::{Error, Result};
use crate::value::{
    escaped_len, normalize_string, parse_quoted, parse_value_text, quote_string, value_text,
    Format, Value, FIXED_FIELD_WIDTH,
};

// ---- Types ----

/// How a card is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// `NAME    = value` with the value right-justified to column 30.
    Fixed,
    /// `NAME    = value` with the value written compactly from column 11.
    Free,
    /// `COMMENT`, `HISTORY` and `END`.
    Special,
    /// Blank keyword; any text is commentary.
    Blank,
    /// Any other keyword without a value indicator, body kept verbatim.
    Arbitrary,
    /// A `CONTINUE` record carrying one segment of a long string.
    Continue,
}

/// One logical header entry.
///
/// Cards are immutable once built; [`Card::with_value`] and
/// [`Card::with_comment`] return modified copies.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    name: String,
    kind: CardKind,
    value: Option<Value>,
    comment: String,
}

/// Keyword name length in bytes.
pub const NAME_SIZE: usize = 8;

/// Bytes available after the `= ` indicator (columns 11-80).
const VALUE_FIELD_SIZE: usize = CARD_SIZE - 10;

/// Bytes available for commentary text (columns 9-80).
const BODY_SIZE: usize = CARD_SIZE - NAME_SIZE;

pub const KW_END: &str = "END";
pub const KW_COMMENT: &str = "COMMENT";
pub const KW_HISTORY: &str = "HISTORY";
pub const KW_CONTINUE: &str = "CONTINUE";

/// Separator written between a value and its comment.
const COMMENT_SEPARATOR: &str = " / ";

/// Marks a string or comment segment that continues on the next record.
const CONTINUATION_MARKER: char = '&';

/// Returns `true` if `name` is a legal keyword: at most 8 characters from
/// `A-Z`, `0-9`, space, `-` and `_`.
pub fn is_valid_name_bytes(name: &[u8]) -> bool {
    name.len() <= NAME_SIZE
        && name
            .iter()
            .all(|&b| matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b' ' | b'-' | b'_'))
}

/// String form of [`is_valid_name_bytes`].
pub fn is_valid_name(name: &str) -> bool {
    is_valid_name_bytes(name.as_bytes())
}

fn is_printable(text: &str) -> bool {
    text.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn check_text(text: &str) -> Result<()> {
    if is_printable(text) {
        Ok(())
    } else {
        Err(Error::MalformedCardBody("text is not printable ASCII"))
    }
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(Error::MalformedCardName(String::from(name)))
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, KW_END | KW_COMMENT | KW_HISTORY | KW_CONTINUE) || name.trim().is_empty()
}

impl Card {
    /// Build a valued card in the given layout.
    pub fn new(
        name: &str,
        value: Option<Value>,
        comment: &str,
        format: Format,
    ) -> Result<Card> {
        check_name(name)?;
        if is_reserved(name) {
            return Err(Error::MalformedCardName(String::from(name)));
        }
        if let Some(v) = &value {
            if !v.is_finite() {
                return Err(Error::NonFiniteValue(String::from(name)));
            }
            if let Value::String(s) = v {
                check_text(s)?;
            }
        }
        check_text(comment)?;
        Ok(Card {
            name: String::from(name.trim_end()),
            kind: match format {
                Format::Fixed => CardKind::Fixed,
                Format::Free => CardKind::Free,
            },
            value,
            comment: String::from(comment.trim_end()),
        })
    }

    /// Fixed-format valued card.
    pub fn fixed(name: &str, value: Value, comment: &str) -> Result<Card> {
        Card::new(name, Some(value), comment, Format::Fixed)
    }

    /// Free-format valued card.
    pub fn free(name: &str, value: Value, comment: &str) -> Result<Card> {
        Card::new(name, Some(value), comment, Format::Free)
    }

    fn commentary(name: &str, kind: CardKind, text: &str) -> Result<Card> {
        check_text(text)?;
        Ok(Card {
            name: String::from(name),
            kind,
            value: None,
            comment: String::from(text.trim_end()),
        })
    }

    /// `COMMENT` card.
    pub fn comment_card(text: &str) -> Result<Card> {
        Card::commentary(KW_COMMENT, CardKind::Special, text)
    }

    /// `HISTORY` card.
    pub fn history(text: &str) -> Result<Card> {
        Card::commentary(KW_HISTORY, CardKind::Special, text)
    }

    /// Card with a blank keyword.
    pub fn blank(text: &str) -> Result<Card> {
        Card::commentary("", CardKind::Blank, text)
    }

    /// Keyword without a value indicator whose body is kept verbatim.
    pub fn arbitrary(name: &str, body: &str) -> Result<Card> {
        check_name(name)?;
        if is_reserved(name) {
            return Err(Error::MalformedCardName(String::from(name)));
        }
        Card::commentary(name.trim_end(), CardKind::Arbitrary, body)
    }

    /// One `CONTINUE` record: a raw string segment (including any trailing
    /// `&`) and its comment segment.
    pub fn continuation(segment: &str, comment: &str) -> Result<Card> {
        check_text(segment)?;
        check_text(comment)?;
        Ok(Card {
            name: String::from(KW_CONTINUE),
            kind: CardKind::Continue,
            value: Some(Value::String(String::from(segment))),
            comment: String::from(comment.trim_end()),
        })
    }

    /// The `END` card.
    pub fn end() -> Card {
        Card {
            name: String::from(KW_END),
            kind: CardKind::Special,
            value: None,
            comment: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Returns `true` if this card is the END keyword.
    pub fn is_end(&self) -> bool {
        self.name == KW_END && self.kind == CardKind::Special
    }

    /// Returns `true` for cards that carry only commentary text.
    pub fn is_commentary(&self) -> bool {
        matches!(self.kind, CardKind::Blank | CardKind::Arbitrary)
            || (self.kind == CardKind::Special && !self.is_end())
    }

    /// Copy of this card with a different value.
    pub fn with_value(&self, value: Option<Value>) -> Result<Card> {
        let format = match self.kind {
            CardKind::Fixed => Format::Fixed,
            CardKind::Free => Format::Free,
            _ => return Err(Error::MalformedCardBody("card kind does not carry a value")),
        };
        Card::new(&self.name, value, &self.comment, format)
    }

    /// Copy of this card with a different comment.
    pub fn with_comment(&self, comment: &str) -> Result<Card> {
        check_text(comment)?;
        Ok(Card {
            comment: String::from(comment.trim_end()),
            ..self.clone()
        })
    }

    // ---- Encoding ----

    /// Encode into exactly one 80-byte record.
    ///
    /// Fails with [`Error::FieldTooLong`] when the card needs more room; use
    /// [`Card::split_continued`] for long strings.
    pub fn encode(&self) -> Result<[u8; CARD_SIZE]> {
        let mut buf = [b' '; CARD_SIZE];
        buf[..self.name.len()].copy_from_slice(self.name.as_bytes());

        match self.kind {
            CardKind::Special | CardKind::Blank | CardKind::Arbitrary => {
                if self.is_end() {
                    return Ok(buf);
                }
                if self.comment.len() > BODY_SIZE {
                    return Err(Error::FieldTooLong(self.name.clone()));
                }
                self.put(&mut buf, NAME_SIZE, &self.comment)?;
            }
            CardKind::Continue => {
                let segment = self.value.as_ref().and_then(Value::as_str).unwrap_or("");
                let text = quote_string(segment, 0);
                let end = self.put(&mut buf, 10, &text)?;
                self.put_comment(&mut buf, end)?;
            }
            CardKind::Fixed | CardKind::Free => {
                buf[8] = b'=';
                let format = if self.kind == CardKind::Fixed {
                    Format::Fixed
                } else {
                    Format::Free
                };
                let end = match &self.value {
                    None if format == Format::Fixed => 10 + FIXED_FIELD_WIDTH,
                    None => 10,
                    Some(value) => {
                        let text = value_text(value, format)
                            .ok_or_else(|| Error::FieldTooLong(self.name.clone()))?;
                        let right_justify = format == Format::Fixed
                            && !matches!(value, Value::String(_))
                            && text.len() <= FIXED_FIELD_WIDTH;
                        let start = if right_justify {
                            10 + FIXED_FIELD_WIDTH - text.len()
                        } else {
                            10
                        };
                        self.put(&mut buf, start, &text)?
                    }
                };
                self.put_comment(&mut buf, end)?;
            }
        }
        Ok(buf)
    }

    /// Copy `text` into `buf` at `start`, returning the end offset.
    fn put(&self, buf: &mut [u8; CARD_SIZE], start: usize, text: &str) -> Result<usize> {
        let end = start + text.len();
        if end > CARD_SIZE {
            return Err(Error::FieldTooLong(self.name.clone()));
        }
        buf[start..end].copy_from_slice(text.as_bytes());
        Ok(end)
    }

    fn put_comment(&self, buf: &mut [u8; CARD_SIZE], end: usize) -> Result<()> {
        if self.comment.is_empty() {
            return Ok(());
        }
        let end = self.put(buf, end, COMMENT_SEPARATOR)?;
        self.put(buf, end, &self.comment)?;
        Ok(())
    }

    /// Split a card whose string value or comment overflows one record into a
    /// primary card followed by `CONTINUE` cards.
    ///
    /// Every value segment except the last ends with `&`, as does every
    /// non-empty comment segment except the last. A card that already fits is
    /// returned unchanged.
    pub fn split_continued(&self) -> Result<Vec<Card>> {
        match self.encode() {
            Ok(_) => return Ok(vec![self.clone()]),
            Err(Error::FieldTooLong(_)) => {}
            Err(e) => return Err(e),
        }
        let text = match (&self.kind, &self.value) {
            (CardKind::Fixed | CardKind::Free, Some(Value::String(s))) => s.as_str(),
            _ => return Err(Error::FieldTooLong(self.name.clone())),
        };

        // quotes + marker
        let value_overhead = 3;
        // separator + marker
        let comment_overhead = COMMENT_SEPARATOR.len() + 1;

        let mut segments: Vec<(&str, &str)> = Vec::new();
        let mut value_rest = text;
        let mut comment_rest = self.comment.as_str();
        loop {
            let (chunk, rest) = take_escaped(value_rest, VALUE_FIELD_SIZE - value_overhead);
            value_rest = rest;
            let room = VALUE_FIELD_SIZE - value_overhead - escaped_len(chunk);
            let (comment_chunk, comment_after) =
                if !comment_rest.is_empty() && room > comment_overhead {
                    let take = comment_rest.len().min(room - comment_overhead);
                    comment_rest.split_at(take)
                } else {
                    ("", comment_rest)
                };
            comment_rest = comment_after;
            segments.push((chunk, comment_chunk));
            if value_rest.is_empty() && comment_rest.is_empty() {
                break;
            }
        }

        let last = segments.len() - 1;
        let last_comment = segments.iter().rposition(|(_, c)| !c.is_empty());
        let mut cards = Vec::with_capacity(segments.len());
        for (i, (chunk, comment_chunk)) in segments.into_iter().enumerate() {
            let mut value = String::from(chunk);
            if i < last {
                value.push(CONTINUATION_MARKER);
            }
            let mut comment = String::from(comment_chunk);
            if !comment.is_empty() && Some(i) != last_comment {
                comment.push(CONTINUATION_MARKER);
            }
            let card = if i == 0 {
                Card {
                    name: self.name.clone(),
                    kind: CardKind::Free,
                    value: Some(Value::String(value)),
                    comment,
                }
            } else {
                Card::continuation(&value, &comment)?
            };
            cards.push(card);
        }
        Ok(cards)
    }

    /// Encode into one or more records, splitting long strings with CONTINUE.
    pub fn encode_records(&self) -> Result<Vec<[u8; CARD_SIZE]>> {
        self.split_continued()?.iter().map(Card::encode).collect()
    }

    // ---- Decoding ----

    /// Decode one 80-byte record.
    pub fn decode(record: &[u8; CARD_SIZE]) -> Result<Card> {
        let name_bytes = &record[..NAME_SIZE];
        if !is_valid_name_bytes(name_bytes) {
            return Err(Error::MalformedCardName(
                String::from_utf8_lossy(name_bytes).into_owned(),
            ));
        }
        let body = str::from_utf8(&record[NAME_SIZE..])
            .ok()
            .filter(|b| is_printable(b))
            .ok_or(Error::MalformedCardBody("text is not printable ASCII"))?;
        // Validated above: only ASCII name characters.
        let name = str::from_utf8(name_bytes).unwrap_or("").trim_end();

        match name {
            KW_END => return Ok(Card::end()),
            KW_COMMENT | KW_HISTORY => return Card::commentary(name, CardKind::Special, body),
            "" => return Card::commentary("", CardKind::Blank, body),
            KW_CONTINUE => return decode_continue(body),
            _ => {}
        }

        if record[8] != b'=' {
            return Card::commentary(name, CardKind::Arbitrary, body);
        }

        // Columns 10-80: everything after the value indicator.
        let region = &body[1..];
        let (value_part, comment) = split_comment(region);
        let value = parse_value_text(value_part)?;

        let lead = value_part.len() - value_part.trim_start().len();
        let start = 9 + lead;
        let end = 9 + value_part.trim_end().len();
        let fixed = match &value {
            None => true,
            Some(Value::String(_)) => start == 10 && end >= 10 + MIN_FIXED_STRING_END,
            Some(_) => end == 10 + FIXED_FIELD_WIDTH,
        };

        Ok(Card {
            name: String::from(name),
            kind: if fixed { CardKind::Fixed } else { CardKind::Free },
            value,
            comment: String::from(comment),
        })
    }
}

/// A fixed-format string's closing quote sits at column 20 or later.
const MIN_FIXED_STRING_END: usize = 10;

/// Take as many leading characters of `s` as fit in `budget` bytes once quotes
/// are doubled. A doubled quote is never split.
fn take_escaped(s: &str, budget: usize) -> (&str, &str) {
    let mut used = 0;
    for (i, b) in s.bytes().enumerate() {
        let cost = if b == b'\'' { 2 } else { 1 };
        if used + cost > budget {
            return s.split_at(i);
        }
        used += cost;
    }
    (s, "")
}

/// Split a value region at the first `/` outside a quoted string, returning
/// the value text and the comment (one leading space and trailing spaces
/// removed).
fn split_comment(region: &str) -> (&str, &str) {
    let mut quoted = false;
    for (i, b) in region.bytes().enumerate() {
        match b {
            b'\'' => quoted = !quoted,
            b'/' if !quoted => {
                let after = &region[i + 1..];
                let comment = after.strip_prefix(' ').unwrap_or(after).trim_end();
                return (&region[..i], comment);
            }
            _ => {}
        }
    }
    (region, "")
}

fn decode_continue(body: &str) -> Result<Card> {
    let (value_part, comment) = split_comment(body);
    let value_part = value_part.trim();
    let segment = if value_part.is_empty() {
        String::new()
    } else {
        let (content, rest) = parse_quoted(value_part)?;
        if !rest.trim().is_empty() {
            return Err(Error::MalformedCardBody("text after closing quote"));
        }
        normalize_string(content)
    };
    Ok(Card {
        name: String::from(KW_CONTINUE),
        kind: CardKind::Continue,
        value: Some(Value::String(segment)),
        comment: String::from(comment),
    })
}

fn strip_marker(segment: &str) -> &str {
    segment.strip_suffix(CONTINUATION_MARKER).unwrap_or(segment)
}

/// Reassemble long strings written with the CONTINUE convention.
///
/// A string-valued card ending in `&` followed by `CONTINUE` cards becomes one
/// logical card. Value and comment segments are joined independently, each
/// losing exactly one trailing `&` except the last. Every other card passes
/// through unchanged.
pub fn merge_continued(cards: &[Card]) -> Vec<Card> {
    let mut merged = Vec::with_capacity(cards.len());
    let mut i = 0;
    while i < cards.len() {
        let card = &cards[i];
        let starts_chain = matches!(card.kind, CardKind::Fixed | CardKind::Free)
            && card
                .value
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|s| s.ends_with(CONTINUATION_MARKER))
            && cards.get(i + 1).is_some_and(|c| c.kind == CardKind::Continue);
        if !starts_chain {
            merged.push(card.clone());
            i += 1;
            continue;
        }

        let mut chain = vec![card];
        let mut j = i + 1;
        while j < cards.len() && cards[j].kind == CardKind::Continue {
            let previous_continues = chain
                .last()
                .and_then(|c| c.value.as_ref())
                .and_then(Value::as_str)
                .is_some_and(|s| s.ends_with(CONTINUATION_MARKER));
            if !previous_continues {
                break;
            }
            chain.push(&cards[j]);
            j += 1;
        }

        let last = chain.len() - 1;
        let mut value = String::new();
        for (k, c) in chain.iter().enumerate() {
            let segment = c.value.as_ref().and_then(Value::as_str).unwrap_or("");
            value.push_str(if k < last { strip_marker(segment) } else { segment });
        }

        let comments: Vec<&str> = chain
            .iter()
            .map(|c| c.comment.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        let mut comment = String::new();
        for (k, c) in comments.iter().enumerate() {
            comment.push_str(if k + 1 < comments.len() { strip_marker(c) } else { *c });
        }

        merged.push(Card {
            name: card.name.clone(),
            kind: card.kind,
            value: Some(Value::String(value)),
            comment,
        });
        i = j;
    }
    merged
}

// ---- Header blocks ----

/// Decode the 36 records of one header block.
pub fn parse_header_block(block: &[u8; BLOCK_SIZE]) -> Result<Vec<Card>> {
    block
        .chunks_exact(CARD_SIZE)
        .map(|record| {
            let record: &[u8; CARD_SIZE] = record
                .try_into()
                .map_err(|_| Error::BufferContractViolation("record is not 80 bytes"))?;
            Card::decode(record)
        })
        .collect()
}

/// Serialize a run of cards into complete header blocks.
///
/// Long strings are split with CONTINUE, any END card in the input is dropped
/// and a single END is appended, and the final block is padded with blank
/// records. The returned length is always a multiple of [`BLOCK_SIZE`].
pub fn serialize_header(cards: &[Card]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    for card in cards.iter().filter(|c| !c.is_end()) {
        for record in card.encode_records()? {
            out.extend_from_slice(&record);
        }
    }
    out.extend_from_slice(&Card::end().encode()?);
    let records = out.len() / CARD_SIZE;
    let padded = records.div_ceil(CARDS_PER_BLOCK) * BLOCK_SIZE;
    out.resize(padded, HEADER_PAD_BYTE);
    Ok(out)
}

/// Number of 80-byte records `cards` occupy once long strings are split.
pub fn record_count(cards: &[Card]) -> Result<usize> {
    cards
        .iter()
        .map(|c| c.split_continued().map(|parts| parts.len()))
        .sum()
}

/// First card with the given keyword.
pub fn find_card<'a>(cards: &'a [Card], name: &str) -> Option<&'a Card> {
    cards.iter().find(|c| c.name == name)
}

// ---- Tests ----
