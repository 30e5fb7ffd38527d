//! JSON encoding for scalars that may be non-finite.
//!
//! JSON has no literal for infinity or NaN and `serde_json` writes them as
//! `null`, which then fails to read back as `f64`. A perfect prediction has
//! PSNR `+inf`, so every persisted scalar goes through these helpers: finite
//! values stay plain numbers, the rest become the strings `"inf"`, `"-inf"`
//! and `"nan"`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Scalar::Number(value)
        } else if value.is_nan() {
            Scalar::Text("nan".to_string())
        } else if value > 0.0 {
            Scalar::Text("inf".to_string())
        } else {
            Scalar::Text("-inf".to_string())
        }
    }
}

impl Scalar {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Scalar::Number(value) => Ok(value),
            Scalar::Text(text) => match text.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(E::custom(format!("expected a number, \"inf\", \"-inf\" or \"nan\", got {other:?}"))),
            },
        }
    }
}

/// `serialize_with`/`deserialize_with` pair for a single `f64`.
pub(crate) mod scalar {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        Scalar::from(*value).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Scalar::deserialize(deserializer)?.into_f64()
    }
}

/// The same pair for an optional `f64`.
pub(crate) mod optional {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(Scalar::from).serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Option::<Scalar>::deserialize(deserializer)?
            .map(Scalar::into_f64)
            .transpose()
    }
}

/// The same pair for named series of `(step, value)` points.
pub(crate) mod series {
    use super::*;

    type Series = BTreeMap<String, Vec<(usize, f64)>>;

    pub(crate) fn serialize<S: Serializer>(series: &Series, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, Vec<(usize, Scalar)>> = series
            .iter()
            .map(|(name, points)| {
                let points = points.iter().map(|&(step, v)| (step, Scalar::from(v))).collect();
                (name.as_str(), points)
            })
            .collect();
        encoded.serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Series, D::Error> {
        BTreeMap::<String, Vec<(usize, Scalar)>>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, points)| {
                let points = points
                    .into_iter()
                    .map(|(step, v)| v.into_f64().map(|v| (step, v)))
                    .collect::<Result<Vec<_>, D::Error>>()?;
                Ok((name, points))
            })
            .collect()
    }
}
