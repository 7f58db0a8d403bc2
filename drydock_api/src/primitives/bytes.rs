use std::{fmt, str::FromStr};

use serde::de;

/// Binary units understood across the configuration, the plan, and the
/// rendered document. The suffixes match what the declarative formatter and
/// the LVM tools accept.
const UNITS: [(char, u32); 4] = [('K', 10), ('M', 20), ('G', 30), ('T', 40)];

/// A size in bytes. Displays and serializes with the largest binary unit
/// that represents the value exactly ("50G", "1025K"), falling back to the
/// raw byte count, and parses either form back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteCount(pub u64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid byte count '{0}'")]
pub struct ParseByteCountError(String);

impl ByteCount {
    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn kib(n: u64) -> Self {
        ByteCount(n << 10)
    }

    pub const fn mib(n: u64) -> Self {
        ByteCount(n << 20)
    }

    pub const fn gib(n: u64) -> Self {
        ByteCount(n << 30)
    }

    /// The value with the largest unit that divides it evenly, when any
    /// unit does.
    fn as_unit_string(&self) -> Option<String> {
        if self.0 == 0 {
            return None;
        }

        UNITS
            .iter()
            .rev()
            .find(|(_, shift)| self.0 % (1u64 << shift) == 0)
            .map(|(suffix, shift)| format!("{}{}", self.0 >> shift, suffix))
    }
}

impl From<u64> for ByteCount {
    fn from(bytes: u64) -> Self {
        ByteCount(bytes)
    }
}

impl fmt::Display for ByteCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_unit_string() {
            Some(s) => f.write_str(&s),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ByteCount {
    type Err = ParseByteCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseByteCountError(s.to_string());

        let trimmed = s.trim();
        let (digits, shift) = match trimmed.chars().last() {
            Some(last) => match UNITS.iter().find(|(suffix, _)| *suffix == last) {
                Some((_, shift)) => (&trimmed[..trimmed.len() - 1], *shift),
                None => (trimmed, 0),
            },
            None => return Err(invalid()),
        };

        let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
        value
            .checked_shl(shift)
            .filter(|v| v >> shift == value)
            .map(ByteCount)
            .ok_or_else(invalid)
    }
}

impl serde::Serialize for ByteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.as_unit_string() {
            Some(s) => serializer.serialize_str(&s),
            None => serializer.serialize_u64(self.0),
        }
    }
}

impl<'de> serde::Deserialize<'de> for ByteCount {
    fn deserialize<D>(deserializer: D) -> Result<ByteCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteCountVisitor;

        impl de::Visitor<'_> for ByteCountVisitor {
            type Value = ByteCount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte count, as a number or a string like \"16G\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteCount, E> {
                Ok(ByteCount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteCount, E> {
                u64::try_from(v)
                    .map(ByteCount)
                    .map_err(|_| E::custom("byte count cannot be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteCount, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteCountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("1".parse::<ByteCount>().unwrap(), ByteCount(1));
        assert_eq!("20K".parse::<ByteCount>().unwrap(), ByteCount(20 << 10));
        assert_eq!("30M".parse::<ByteCount>().unwrap(), ByteCount(30 << 20));
        assert_eq!("40G".parse::<ByteCount>().unwrap(), ByteCount(40 << 30));
        assert_eq!("50T".parse::<ByteCount>().unwrap(), ByteCount(50 << 40));

        // Surrounding and inner whitespace before the suffix
        assert_eq!(" 1024 ".parse::<ByteCount>().unwrap(), ByteCount(1024));
        assert_eq!("1 K".parse::<ByteCount>().unwrap(), ByteCount(1024));

        for bad in ["", " ", "1.0", "1.0K", "1 0K", "X10K", "G", "-4G", "X"] {
            assert_eq!(
                bad.parse::<ByteCount>(),
                Err(ParseByteCountError(bad.to_string())),
                "input: {bad:?}"
            );
        }

        // Shifting past u64 range is rejected, not wrapped
        "99999999999T".parse::<ByteCount>().unwrap_err();
    }

    #[test]
    fn test_constructors() {
        assert_eq!(ByteCount::kib(1).bytes(), 1024);
        assert_eq!(ByteCount::mib(4).bytes(), 4 << 20);
        assert_eq!(ByteCount::gib(50).bytes(), 50 << 30);
        assert_eq!(ByteCount::from(512u64), ByteCount(512));
    }

    #[test]
    fn test_display_picks_the_largest_exact_unit() {
        assert_eq!(ByteCount(0).to_string(), "0");
        assert_eq!(ByteCount(1023).to_string(), "1023");
        assert_eq!(ByteCount(1024).to_string(), "1K");
        assert_eq!(ByteCount(1025).to_string(), "1025");
        assert_eq!(ByteCount(1 << 20).to_string(), "1M");
        assert_eq!(ByteCount((1 << 20) + 1024).to_string(), "1025K");
        assert_eq!(ByteCount(1 << 30).to_string(), "1G");
        assert_eq!(ByteCount(50 << 30).to_string(), "50G");
        assert_eq!(ByteCount(1 << 40).to_string(), "1T");
    }

    #[test]
    fn test_display_parse_roundtrip() {
        for s in ["0", "1", "1023", "1K", "1025", "1M", "1025K", "1G", "1T"] {
            assert_eq!(s.parse::<ByteCount>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_json_serde() {
        #[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
        struct TestStruct {
            size: ByteCount,
        }

        for (input, expected_bytes, expected_json) in [
            ("{\"size\": 1}", 1u64, "{\"size\":1}"),
            ("{\"size\": \"1K\"}", 1024, "{\"size\":\"1K\"}"),
            ("{\"size\": 1024}", 1024, "{\"size\":\"1K\"}"),
            ("{\"size\": 1025}", 1025, "{\"size\":1025}"),
            ("{\"size\": \"50G\"}", 50 << 30, "{\"size\":\"50G\"}"),
        ] {
            let parsed: TestStruct = serde_json::from_str(input).unwrap();
            assert_eq!(parsed.size.bytes(), expected_bytes, "input: {input}");
            assert_eq!(
                serde_json::to_string(&parsed).unwrap(),
                expected_json,
                "input: {input}"
            );
        }

        serde_json::from_str::<TestStruct>("{\"size\": -4}").unwrap_err();
        serde_json::from_str::<TestStruct>("{\"size\": \"4X\"}").unwrap_err();
    }

    #[test]
    fn test_yaml_serde() {
        #[derive(Debug, serde::Deserialize, PartialEq, Eq)]
        struct TestStruct {
            size: ByteCount,
        }

        let parsed: TestStruct = serde_yaml::from_str("size: 4G").unwrap();
        assert_eq!(parsed.size, ByteCount::gib(4));

        let parsed: TestStruct = serde_yaml::from_str("size: 512").unwrap();
        assert_eq!(parsed.size, ByteCount(512));

        serde_yaml::from_str::<TestStruct>("size: [1]").unwrap_err();
    }
}
