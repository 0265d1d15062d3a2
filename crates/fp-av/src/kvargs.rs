//! Key/value maps to argument lists.

use std::collections::BTreeMap;

/// Option map used throughout the command model. Iteration is in sorted key
/// order, which keeps compiled argument vectors stable.
pub type Options = BTreeMap<String, String>;

/// Expand `map` in sorted key order, `arg_fn` producing the arguments for
/// each pair.
///
/// `{b: 2, a: 1}` becomes `arg_fn(a, 1) ++ arg_fn(b, 2)`.
pub fn sorted_args<F, I>(map: &Options, mut arg_fn: F) -> Vec<String>
where
    F: FnMut(&str, &str) -> I,
    I: IntoIterator<Item = String>,
{
    let mut args = Vec::with_capacity(map.len() * 2);
    for (k, v) in map {
        args.extend(arg_fn(k, v));
    }
    args
}

/// Options as `-key<suffix> value` pairs. A leading `-` is added to keys
/// that lack one.
pub fn option_args(map: &Options, suffix: &str) -> Vec<String> {
    sorted_args(map, |k, v| {
        let flag = if k.starts_with('-') {
            format!("{k}{suffix}")
        } else {
            format!("-{k}{suffix}")
        };
        [flag, v.to_string()]
    })
}

/// Build an [`Options`] map from pairs.
pub fn options<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Options
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
