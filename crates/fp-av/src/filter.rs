//! Filter graph model and its `-filter_complex` serialization.
//!
//! A graph is a list of chains, a chain a list of filters. Serialization
//! joins chains with `;` and filters with `,`; each filter renders as
//! `[in]...name=k=v:k=v...[out]...` with options in sorted key order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kvargs::{sorted_args, Options};

/// One filter with its pad labels and options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub options: Options,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an input pad label.
    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.inputs.push(label.into());
        self
    }

    /// Add an output pad label.
    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(label.into());
        self
    }

    /// Set an option.
    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.insert(key.into(), value.to_string());
        self
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.inputs {
            write!(f, "[{}]", escape_label(label))?;
        }
        let opts = sorted_args(&self.options, |k, v| [format!("{k}={}", escape_value(v))]);
        write!(f, "{}={}", self.name, opts.join(":"))?;
        for label in &self.outputs {
            write!(f, "[{}]", escape_label(label))?;
        }
        Ok(())
    }
}

/// Filters connected in sequence.
pub type FilterChain = Vec<Filter>;

/// An ordered list of filter chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterGraph {
    pub chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chain.
    pub fn push(&mut self, chain: FilterChain) -> &mut Self {
        self.chains.push(chain);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }
}

impl From<Vec<FilterChain>> for FilterGraph {
    fn from(chains: Vec<FilterChain>) -> Self {
        Self { chains }
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            for (j, filter) in chain.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{filter}")?;
            }
        }
        Ok(())
    }
}

fn escape_label(label: &str) -> String {
    label.replace(']', "\\]")
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == ':' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_filter() {
        let f = Filter::new("scale")
            .input("0:1")
            .option("w", 320)
            .option("h", 200)
            .output("out0");
        assert_eq!(f.to_string(), "[0:1]scale=h=200:w=320[out0]");
    }

    #[test]
    fn filter_without_options_keeps_equals() {
        let f = Filter::new("copy").input("a").output("out");
        assert_eq!(f.to_string(), "[a]copy=[out]");
    }

    #[test]
    fn chains_and_filters_joined() {
        let graph = FilterGraph::from(vec![
            vec![Filter::new("anull").input("0:0"), Filter::new("volume").option("volume", "0.5").output("a")],
            vec![Filter::new("anullsink").input("a")],
        ]);
        assert_eq!(
            graph.to_string(),
            "[0:0]anull=,volume=volume=0.5[a];[a]anullsink="
        );
    }

    #[test]
    fn values_escape_comma_and_colon_only_in_values() {
        let f = Filter::new("select")
            .input("in:x")
            .option("expr", "between(t,0,5)")
            .option("size", "10:20")
            .output("o,1");
        assert_eq!(
            f.to_string(),
            "[in:x]select=expr=between(t\\,0\\,5):size=10\\:20[o,1]"
        );
    }

    #[test]
    fn labels_escape_closing_bracket() {
        let f = Filter::new("null").input("a]b").output("c]");
        assert_eq!(f.to_string(), "[a\\]b]null=[c\\]]");
    }

    #[test]
    fn serializes_with_serde() {
        let graph = FilterGraph::from(vec![vec![Filter::new("null")]]);
        let json = serde_json::to_string(&graph).unwrap();
        let back: FilterGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
