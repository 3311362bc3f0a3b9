// Configuration files in the wild write integers both as YAML numbers and as quoted strings.
// `deserialize_any` is only used for human-readable formats. Binary formats get the native value.

use core::{
    fmt::{Display, Formatter, Result as FmtResult},
    marker::PhantomData,
    str::FromStr,
};

use serde::{
    de::{Error, IntoDeserializer as _, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Deserialize<'de> + FromStr<Err: Display>,
    D: Deserializer<'de>,
{
    struct AnyVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de> + FromStr<Err: Display>> Visitor<'de> for AnyVisitor<T> {
        type Value = T;

        fn expecting(&self, formatter: &mut Formatter) -> FmtResult {
            formatter.write_str("a string or integer")
        }

        fn visit_str<E: Error>(self, string: &str) -> Result<Self::Value, E> {
            string.parse().map_err(E::custom)
        }

        fn visit_u64<E: Error>(self, value: u64) -> Result<Self::Value, E> {
            T::deserialize(value.into_deserializer())
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_any(AnyVisitor(PhantomData))
    } else {
        T::deserialize(deserializer)
    }
}

pub fn serialize<S: Serializer>(
    value: impl Serialize + Display,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.collect_str(&value)
    } else {
        value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(with = "crate::string_or_native")]
        epoch: u64,
        #[serde(with = "crate::string_or_native")]
        quotient: NonZeroU64,
    }

    #[test]
    fn accepts_quoted_and_native_integers() -> Result<(), serde_yaml::Error> {
        let native = serde_yaml::from_str::<Wrapper>("epoch: 5\nquotient: 32")?;
        let quoted = serde_yaml::from_str::<Wrapper>("epoch: '5'\nquotient: '32'")?;

        assert_eq!(native.epoch, 5);
        assert_eq!(quoted.epoch, 5);
        assert_eq!(native.quotient, quoted.quotient);

        Ok(())
    }

    #[test]
    fn rejects_zero_for_nonzero_fields() {
        assert!(serde_yaml::from_str::<Wrapper>("epoch: 5\nquotient: 0").is_err());
    }
}
