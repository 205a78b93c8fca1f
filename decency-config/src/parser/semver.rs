pub fn serialize<S>(value: &semver::VersionReq, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<semver::VersionReq, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = <String as serde::Deserialize>::deserialize(deserializer)?;
    semver::VersionReq::parse(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    #[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
    struct S {
        #[serde(
            serialize_with = "crate::parser::semver::serialize",
            deserialize_with = "crate::parser::semver::deserialize"
        )]
        v: semver::VersionReq,
    }

    #[test]
    fn round_trip() {
        let parsed = toml::from_str::<S>(r#"v = ">=0.1.0, <1.0.0""#).unwrap();
        assert!(parsed.v.matches(&semver::Version::new(0, 1, 5)));
        assert!(!parsed.v.matches(&semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn invalid() {
        assert!(toml::from_str::<S>(r#"v = "not a version""#).is_err());
    }
}
