//! Resolution of a header's cards into the shape of its data unit.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::{padded_byte_len, padded_card_count, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::header::Card;
use crate::value::Value;

/// Largest rank the FITS standard allows.
pub const MAX_NAXIS: i64 = 999;

/// Element type of a data unit, selected by `BITPIX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl ElementType {
    /// Map a `BITPIX` value to its element type.
    pub fn from_bitpix(bitpix: i64) -> Result<ElementType> {
        match bitpix {
            8 => Ok(ElementType::U8),
            16 => Ok(ElementType::I16),
            32 => Ok(ElementType::I32),
            -32 => Ok(ElementType::F32),
            -64 => Ok(ElementType::F64),
            other => Err(Error::UnsupportedElementType(other)),
        }
    }

    pub fn bitpix(self) -> i64 {
        match self {
            ElementType::U8 => 8,
            ElementType::I16 => 16,
            ElementType::I32 => 32,
            ElementType::F32 => -32,
            ElementType::F64 => -64,
        }
    }

    /// Bytes per element (`|BITPIX| / 8`).
    pub fn item_size(self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }
}

/// Shape of one HDU's data unit, derived from its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// `true` for a `SIMPLE` header, `false` for an `XTENSION`.
    pub is_primary: bool,
    pub element_type: ElementType,
    /// `NAXIS1..NAXISn`, fastest-varying axis first.
    pub dimensions: Vec<usize>,
    /// `PCOUNT`, 0 when absent.
    pub param_count: usize,
    /// `GCOUNT`, 1 when absent.
    pub group_count: usize,
    /// Card slots the header occupies, rounded up to whole blocks.
    pub key_count: usize,
    random_groups: bool,
}

impl Descriptor {
    /// Bytes per element.
    pub fn item_size(&self) -> usize {
        self.element_type.item_size()
    }

    /// `group_count × (Π dimensions + param_count)`.
    ///
    /// A header with `NAXIS = 0` has no data. For random groups
    /// (`GROUPS = T`, `NAXIS1 = 0`) the zero first axis is left out of the
    /// product.
    ///
    /// Saturates at `usize::MAX` for hand-edited descriptors whose size does
    /// not fit; [`resolve`] never returns one.
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Payload size in bytes, without block padding.
    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Payload size rounded up to whole 2880-byte blocks.
    pub fn aligned_size(&self) -> usize {
        self.checked_aligned_size().unwrap_or(usize::MAX)
    }

    fn checked_element_count(&self) -> Option<usize> {
        if self.dimensions.is_empty() {
            return Some(0);
        }
        let axes = if self.random_groups {
            &self.dimensions[1..]
        } else {
            &self.dimensions[..]
        };
        let pixels = axes.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        self.group_count.checked_mul(pixels.checked_add(self.param_count)?)
    }

    fn checked_byte_size(&self) -> Option<usize> {
        self.checked_element_count()?.checked_mul(self.item_size())
    }

    fn checked_aligned_size(&self) -> Option<usize> {
        let bytes = self.checked_byte_size()?;
        bytes.checked_add(BLOCK_SIZE - 1)?;
        Some(padded_byte_len(bytes))
    }

    /// Whether the header declared random groups.
    pub fn is_random_groups(&self) -> bool {
        self.random_groups
    }
}

fn out_of_range(key: &str, reason: &'static str) -> Error {
    Error::MandatoryKeyOutOfRange {
        key: String::from(key),
        reason,
    }
}

fn integer_of(card: &Card) -> Result<i64> {
    card.value()
        .and_then(Value::as_i64)
        .ok_or_else(|| out_of_range(card.name(), "value is not an integer"))
}

fn non_negative(card: &Card) -> Result<usize> {
    let n = integer_of(card)?;
    usize::try_from(n).map_err(|_| out_of_range(card.name(), "value is negative"))
}

/// Store `value` in `slot`, rejecting a second occurrence of `key`.
fn set_once<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(Error::MandatoryKeyDuplicated(String::from(key)));
    }
    *slot = Some(value);
    Ok(())
}

/// Axis index of an `NAXISn` keyword, if `name` is one.
fn axis_index(name: &str) -> Option<&str> {
    let digits = name.strip_prefix("NAXIS")?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

fn is_standard_start(card: &Card) -> Option<bool> {
    match (card.name(), card.value()) {
        ("SIMPLE", Some(Value::Bool(true))) => Some(true),
        ("XTENSION", Some(Value::Bool(true))) => Some(false),
        ("XTENSION", Some(Value::String(s))) if !s.trim().is_empty() => Some(false),
        _ => None,
    }
}

/// Resolve the cards of one header into a [`Descriptor`].
///
/// The first card must be `SIMPLE = T` or an `XTENSION`. The remaining
/// mandatory keys may come in any order, except that `NAXIS` has to precede
/// every `NAXISn`. An `END` card is not required.
pub fn resolve(cards: &[Card]) -> Result<Descriptor> {
    let is_primary = cards
        .first()
        .and_then(is_standard_start)
        .ok_or(Error::NotStandardHdu)?;

    let mut bitpix: Option<i64> = None;
    let mut naxis: Option<usize> = None;
    let mut dimensions: Vec<Option<usize>> = Vec::new();
    let mut pcount: Option<usize> = None;
    let mut gcount: Option<usize> = None;
    let mut groups = false;

    for card in cards {
        match card.name() {
            "BITPIX" => set_once(&mut bitpix, "BITPIX", integer_of(card)?)?,
            "NAXIS" => {
                let n = integer_of(card)?;
                if naxis.is_some() {
                    return Err(Error::MandatoryKeyDuplicated(String::from("NAXIS")));
                }
                if n < 0 {
                    return Err(out_of_range("NAXIS", "value is negative"));
                }
                if n > MAX_NAXIS {
                    return Err(out_of_range("NAXIS", "rank exceeds 999"));
                }
                let n = n as usize;
                naxis = Some(n);
                dimensions = vec![None; n];
            }
            "PCOUNT" => set_once(&mut pcount, "PCOUNT", non_negative(card)?)?,
            "GCOUNT" => set_once(&mut gcount, "GCOUNT", non_negative(card)?)?,
            "GROUPS" => groups = card.value().and_then(Value::as_bool).unwrap_or(false),
            name => {
                let Some(digits) = axis_index(name) else {
                    continue;
                };
                let rank = naxis.ok_or_else(|| out_of_range(name, "appears before NAXIS"))?;
                let k: usize = digits
                    .parse()
                    .map_err(|_| out_of_range(name, "axis index exceeds NAXIS"))?;
                if k == 0 || k > rank {
                    return Err(out_of_range(name, "axis index exceeds NAXIS"));
                }
                set_once(&mut dimensions[k - 1], name, non_negative(card)?)?;
            }
        }
    }

    let bitpix = bitpix.ok_or_else(|| Error::MandatoryKeyMissing(String::from("BITPIX")))?;
    let naxis = naxis.ok_or_else(|| Error::MandatoryKeyMissing(String::from("NAXIS")))?;
    let element_type = ElementType::from_bitpix(bitpix)?;

    let dimensions = dimensions
        .into_iter()
        .enumerate()
        .map(|(i, d)| d.ok_or_else(|| Error::MandatoryKeyMissing(format!("NAXIS{}", i + 1))))
        .collect::<Result<Vec<usize>>>()?;
    debug_assert_eq!(dimensions.len(), naxis);

    let random_groups = is_primary && groups && dimensions.first() == Some(&0);

    let descriptor = Descriptor {
        is_primary,
        element_type,
        dimensions,
        param_count: pcount.unwrap_or(0),
        group_count: gcount.unwrap_or(1),
        key_count: padded_card_count(cards.len()),
        random_groups,
    };
    if descriptor.checked_aligned_size().is_none() {
        return Err(out_of_range("NAXIS", "data size overflows"));
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn int(name: &str, n: i64) -> Card {
        let v = match i32::try_from(n) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(n),
        };
        Card::fixed(name, v, "").unwrap()
    }

    fn simple() -> Card {
        Card::fixed("SIMPLE", Value::Bool(true), "").unwrap()
    }

    fn image_cards(bitpix: i64, dims: &[i64]) -> Vec<Card> {
        let mut cards = vec![simple(), int("BITPIX", bitpix), int("NAXIS", dims.len() as i64)];
        for (i, &d) in dims.iter().enumerate() {
            cards.push(int(&format!("NAXIS{}", i + 1), d));
        }
        cards
    }

    // ---- element types ----

    #[test]
    fn element_type_mapping() {
        for bitpix in [8, 16, 32, -32, -64] {
            assert_eq!(ElementType::from_bitpix(bitpix).unwrap().bitpix(), bitpix);
        }
        assert_eq!(ElementType::F64.item_size(), 8);
        assert_eq!(ElementType::I16.item_size(), 2);
        assert!(matches!(
            ElementType::from_bitpix(64),
            Err(Error::UnsupportedElementType(64))
        ));
    }

    // ---- resolve ----

    #[test]
    fn resolves_two_dimensional_primary() {
        let d = resolve(&image_cards(32, &[20, 36])).unwrap();
        assert!(d.is_primary);
        assert_eq!(d.element_type, ElementType::I32);
        assert_eq!(d.dimensions, vec![20, 36]);
        assert_eq!(d.param_count, 0);
        assert_eq!(d.group_count, 1);
        assert_eq!(d.element_count(), 720);
        assert_eq!(d.byte_size(), 2880);
        assert_eq!(d.aligned_size(), 2880);
        assert_eq!(d.key_count, 36);
    }

    #[test]
    fn naxis_zero_has_no_data() {
        let d = resolve(&image_cards(8, &[])).unwrap();
        assert!(d.dimensions.is_empty());
        assert_eq!(d.byte_size(), 0);
        assert_eq!(d.aligned_size(), 0);
    }

    #[test]
    fn extension_with_pcount_and_gcount() {
        let mut cards = vec![
            Card::fixed("XTENSION", Value::String("IMAGE".to_string()), "").unwrap(),
            int("BITPIX", -64),
            int("NAXIS", 1),
            int("NAXIS1", 10),
            int("PCOUNT", 2),
            int("GCOUNT", 3),
        ];
        let d = resolve(&cards).unwrap();
        assert!(!d.is_primary);
        assert_eq!(d.element_count(), 3 * (10 + 2));
        assert_eq!(d.byte_size(), 36 * 8);

        cards[0] = Card::fixed("XTENSION", Value::Bool(true), "").unwrap();
        assert!(!resolve(&cards).unwrap().is_primary);
    }

    #[test]
    fn random_groups_skip_zero_first_axis() {
        let mut cards = image_cards(-32, &[0, 3, 4]);
        cards.push(Card::fixed("GROUPS", Value::Bool(true), "").unwrap());
        cards.push(int("PCOUNT", 2));
        cards.push(int("GCOUNT", 5));
        let d = resolve(&cards).unwrap();
        assert!(d.is_random_groups());
        assert_eq!(d.element_count(), 5 * (12 + 2));
    }

    #[test]
    fn order_is_free_after_naxis() {
        let cards = vec![
            simple(),
            int("NAXIS", 2),
            int("NAXIS2", 4),
            int("BITPIX", 16),
            int("NAXIS1", 3),
        ];
        let d = resolve(&cards).unwrap();
        assert_eq!(d.dimensions, vec![3, 4]);
        assert_eq!(d.byte_size(), 24);
    }

    #[test]
    fn end_card_is_optional_and_counted() {
        let mut cards = image_cards(8, &[1]);
        let without = resolve(&cards).unwrap();
        cards.push(Card::end());
        let with = resolve(&cards).unwrap();
        assert_eq!(without.dimensions, with.dimensions);
        assert_eq!(with.key_count, 36);
    }

    #[test]
    fn key_count_rounds_to_block_multiple() {
        let mut cards = image_cards(8, &[1]);
        for i in 0..40 {
            cards.push(int("EXTRA", i));
        }
        assert_eq!(resolve(&cards).unwrap().key_count, 72);
    }

    // ---- errors ----

    #[test]
    fn first_card_must_be_simple_or_xtension() {
        let mut cards = image_cards(8, &[]);
        cards.swap(0, 1);
        assert!(matches!(resolve(&cards), Err(Error::NotStandardHdu)));

        let mut cards = image_cards(8, &[]);
        cards[0] = Card::fixed("SIMPLE", Value::Bool(false), "").unwrap();
        assert!(matches!(resolve(&cards), Err(Error::NotStandardHdu)));

        assert!(matches!(resolve(&[]), Err(Error::NotStandardHdu)));
    }

    #[test]
    fn duplicate_bitpix_rejected() {
        let mut cards = image_cards(8, &[]);
        cards.push(int("BITPIX", 16));
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyDuplicated(k)) if k == "BITPIX"
        ));
    }

    #[test]
    fn oversized_data_rejected() {
        let huge = i64::MAX;
        let err = resolve(&image_cards(8, &[huge, huge])).unwrap_err();
        assert!(matches!(err, Error::MandatoryKeyOutOfRange { .. }));
        // element count fits but the byte size does not
        let err = resolve(&image_cards(-64, &[huge])).unwrap_err();
        assert!(matches!(err, Error::MandatoryKeyOutOfRange { .. }));
        let mut cards = image_cards(8, &[2]);
        cards.push(int("GCOUNT", huge));
        cards.push(int("PCOUNT", 1));
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyOutOfRange { .. })
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn large_but_representable_size_resolves() {
        let d = resolve(&image_cards(8, &[1 << 40, 1 << 20])).unwrap();
        assert_eq!(d.byte_size(), 1 << 60);
        assert_eq!(d.aligned_size() % BLOCK_SIZE, 0);
        assert!(resolve(&image_cards(8, &[1 << 40, 1 << 40])).is_err());
    }

    #[test]
    fn duplicate_naxis_rejected() {
        let mut cards = image_cards(8, &[2]);
        cards.push(int("NAXIS", 1));
        assert!(matches!(resolve(&cards), Err(Error::MandatoryKeyDuplicated(_))));
    }

    #[test]
    fn duplicate_axis_rejected() {
        let mut cards = image_cards(8, &[2]);
        cards.push(int("NAXIS1", 2));
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyDuplicated(k)) if k == "NAXIS1"
        ));
    }

    #[test]
    fn axis_before_naxis_rejected() {
        let cards = vec![simple(), int("BITPIX", 8), int("NAXIS1", 3), int("NAXIS", 1)];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyOutOfRange { key, .. }) if key == "NAXIS1"
        ));
    }

    #[test]
    fn axis_beyond_rank_rejected() {
        let mut cards = image_cards(8, &[2]);
        cards.push(int("NAXIS3", 2));
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyOutOfRange { key, .. }) if key == "NAXIS3"
        ));
    }

    #[test]
    fn negative_values_rejected() {
        assert!(matches!(
            resolve(&image_cards(8, &[-1])),
            Err(Error::MandatoryKeyOutOfRange { .. })
        ));
        let cards = vec![simple(), int("BITPIX", 8), int("NAXIS", -2)];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_keys_reported() {
        let cards = vec![simple(), int("NAXIS", 0)];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyMissing(k)) if k == "BITPIX"
        ));
        let cards = vec![simple(), int("BITPIX", 8)];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyMissing(k)) if k == "NAXIS"
        ));
        let cards = vec![simple(), int("BITPIX", 8), int("NAXIS", 2), int("NAXIS1", 4)];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyMissing(k)) if k == "NAXIS2"
        ));
    }

    #[test]
    fn unsupported_bitpix() {
        assert!(matches!(
            resolve(&image_cards(64, &[1])),
            Err(Error::UnsupportedElementType(64))
        ));
    }

    #[test]
    fn non_integer_mandatory_value() {
        let cards = vec![
            simple(),
            Card::fixed("BITPIX", Value::Float64(8.5), "").unwrap(),
            int("NAXIS", 0),
        ];
        assert!(matches!(
            resolve(&cards),
            Err(Error::MandatoryKeyOutOfRange { .. })
        ));
    }
}
