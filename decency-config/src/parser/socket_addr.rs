pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<std::net::SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Vec<String> as serde::Deserialize>::deserialize(deserializer)?
        .into_iter()
        .map(|s| <std::net::SocketAddr as std::str::FromStr>::from_str(&s))
        .collect::<Result<Vec<std::net::SocketAddr>, _>>()
        .map_err(serde::de::Error::custom)
}
