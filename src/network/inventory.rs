//! Parsers for `ip` inventory output
//!
//! Handles two formats:
//! - `ip netns list`: `name` or `name (id: N)` per line
//! - `ip -o link show`: `N: name[@peer]: <FLAGS> ...` per line

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space0},
    sequence::{delimited, terminated},
};

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && c != ':' && c != '@'
}

/// `vpc-a-ns-web (id: 0)` -> `vpc-a-ns-web`
fn namespace_entry(input: &str) -> IResult<&str, &str> {
    delimited(space0, take_while1(|c: char| !c.is_whitespace()), space0).parse(input)
}

/// `3: vpc-a-br: <BROADCAST,...>` -> `vpc-a-br`
fn link_entry(input: &str) -> IResult<&str, &str> {
    let (input, _) = terminated(digit1, tag(": ")).parse(input)?;
    take_while1(is_name_char).parse(input)
}

/// Namespace names from `ip netns list`
pub fn parse_namespaces(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| namespace_entry(line).ok())
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Interface names from `ip -o link show`
///
/// Lines that do not look like link entries are skipped.
pub fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| link_entry(line.trim_start()).ok())
        .map(|(_, name)| name.to_string())
        .collect()
}
