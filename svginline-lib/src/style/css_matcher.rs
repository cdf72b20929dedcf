use crate::dom::dom_tree::{
    children, descendants, element_children, parent, tag_name, ElementNode, Node, NodeRef,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// ------------------------------
/// 1. Selector Parsing
/// ------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

/// Supported attribute selector operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOperator {
    /// [attr="value"]
    Exact,
    /// [attr~="value"]
    Includes,
    /// [attr|="value"]
    DashMatch,
    /// [attr^="value"]
    Prefix,
    /// [attr$="value"]
    Suffix,
    /// [attr*="value"]
    Substring,
}

/// Represents one attribute condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub name: String,
    pub operator: Option<AttributeOperator>, // None means only existence check
    pub value: Option<String>,
    /// Set by the trailing `i` flag.
    pub case_insensitive: bool,
}

/// `an+b` from the `:nth-*` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nth {
    pub step: i32,
    pub offset: i32,
}

impl Nth {
    pub fn parse(text: &str) -> Option<Nth> {
        let compact = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match compact.as_str() {
            "odd" => return Some(Nth { step: 2, offset: 1 }),
            "even" => return Some(Nth { step: 2, offset: 0 }),
            _ => {}
        }
        match compact.split_once('n') {
            Some((step, offset)) => {
                let step = match step {
                    "" | "+" => 1,
                    "-" => -1,
                    digits => digits.parse().ok()?,
                };
                let offset = if offset.is_empty() {
                    0
                } else if offset.starts_with(|c| c == '+' || c == '-') {
                    offset.parse().ok()?
                } else {
                    return None;
                };
                Some(Nth { step, offset })
            }
            None => Some(Nth {
                step: 0,
                offset: compact.parse().ok()?,
            }),
        }
    }

    /// Whether the 1-based `position` is one of `a*n + b` for some n >= 0.
    pub fn matches(&self, position: usize) -> bool {
        let position = position as i64;
        let step = i64::from(self.step);
        let diff = position - i64::from(self.offset);
        if step == 0 {
            diff == 0
        } else {
            diff % step == 0 && diff / step >= 0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoClass {
    Root,
    Empty,
    FirstChild,
    LastChild,
    OnlyChild,
    FirstOfType,
    LastOfType,
    OnlyOfType,
    NthChild(Nth),
    NthLastChild(Nth),
    NthOfType(Nth),
    NthLastOfType(Nth),
    /// `:nth-child(An+B of S)`: position counted among the siblings matching `S`.
    NthChildOf(Nth, Vec<ComplexSelector>),
    NthLastChildOf(Nth, Vec<ComplexSelector>),
    Not(Vec<ComplexSelector>),
    Is(Vec<ComplexSelector>),
    /// Like `:is()` but without specificity.
    Where(Vec<ComplexSelector>),
    /// `:has()`, anchored at the element being matched.
    Has(Vec<RelativeSelector>),
    /// Every element of a parsed document is defined.
    Defined,
    /// Depends on interaction or UA state (`:hover`, `:visited`, `:lang()`); a static document
    /// never matches it.
    Dynamic(String),
    /// Accepted syntax we have no semantics for. Never matches, so the rule is copied unmatched.
    Unknown(String),
}

/// A compound selector: optional tag plus ids, classes, attribute conditions and pseudo-classes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundSelector {
    /// `ns|` prefix of the type selector; `Some("")` for `|tag`, `Some("*")` for `*|tag`.
    pub namespace: Option<String>,
    pub tag: Option<String>,
    pub ids: Vec<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeSelector>,
    pub pseudo_classes: Vec<PseudoClass>,
    /// `::before` and friends. Such a selector targets generated content, never an element.
    pub pseudo_element: Option<String>,
}

/// A complex selector composed of a key compound selector and a list of ancestor parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub key: CompoundSelector,
    /// Ancestors with their combinators, in right-to-left order.
    pub ancestors: Vec<(Combinator, CompoundSelector)>,
}

/// An argument of `:has()`: a complex selector that starts with a combinator relative to the
/// anchor element (descendant when none is written).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeSelector {
    pub combinator: Combinator,
    pub selector: ComplexSelector,
}

/// Supported combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Descendant combinator (a space).
    Descendant,
    /// Child combinator (`>`).
    Child,
    /// Adjacent sibling combinator (`+`).
    AdjacentSibling,
    /// General sibling combinator (`~`).
    GeneralSibling,
}

const DYNAMIC_PSEUDO_CLASSES: &[&str] = &[
    "active",
    "any-link",
    "autofill",
    "checked",
    "default",
    "disabled",
    "enabled",
    "focus",
    "focus-visible",
    "focus-within",
    "fullscreen",
    "hover",
    "in-range",
    "indeterminate",
    "invalid",
    "link",
    "modal",
    "optional",
    "out-of-range",
    "placeholder-shown",
    "read-only",
    "read-write",
    "required",
    "target",
    "valid",
    "visited",
];

/// Pseudo-elements that CSS2 allowed with a single colon.
const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["after", "before", "first-letter", "first-line"];

/// Parse a selector list such as `svg .axis > text, #legend rect`.
pub fn parse_selector_list(selector: &str) -> Result<Vec<ComplexSelector>, SelectorError> {
    let mut parser = SelectorParser::new(selector);
    parser.parse_list(false)
}

/// Parse a single complex selector (no commas).
pub fn parse_complex_selector(selector: &str) -> Result<ComplexSelector, SelectorError> {
    let mut list = parse_selector_list(selector)?;
    if list.len() != 1 {
        return Err(SelectorError {
            selector: selector.to_string(),
            reason: "expected a single selector".into(),
        });
    }
    Ok(list.remove(0))
}

struct SelectorParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || !ch.is_ascii()
}

fn is_name_char(ch: char) -> bool {
    is_name_start(ch) || ch.is_ascii_digit() || ch == '-'
}

impl<'a> SelectorParser<'a> {
    fn new(source: &'a str) -> Self {
        SelectorParser {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError {
            selector: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Returns whether anything was skipped; a descendant combinator is just whitespace.
    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
            self.pos += 1;
        }
        self.pos > start
    }

    /// With `nested`, stops in front of the closing `)` of a functional pseudo-class.
    fn parse_list(&mut self, nested: bool) -> Result<Vec<ComplexSelector>, SelectorError> {
        let mut list = Vec::new();
        loop {
            self.skip_whitespace();
            list.push(self.parse_complex()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') if nested => return Ok(list),
                None if !nested => return Ok(list),
                None => return Err(self.error("unclosed '('")),
                Some(ch) => return Err(self.error(format!("unexpected '{}'", ch))),
            }
        }
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, SelectorError> {
        let mut key = self.parse_compound()?;
        let mut ancestors = Vec::new();
        loop {
            let had_space = self.skip_whitespace();
            let combinator = match self.peek() {
                None | Some(',') | Some(')') => break,
                Some('>') => Combinator::Child,
                Some('+') => Combinator::AdjacentSibling,
                Some('~') => Combinator::GeneralSibling,
                Some(_) if had_space => Combinator::Descendant,
                Some(ch) => return Err(self.error(format!("unexpected '{}'", ch))),
            };
            if combinator != Combinator::Descendant {
                self.pos += 1;
                self.skip_whitespace();
            }
            let next = self.parse_compound()?;
            ancestors.push((combinator, std::mem::replace(&mut key, next)));
        }
        ancestors.reverse();
        Ok(ComplexSelector { key, ancestors })
    }

    /// Items of a `:has()` argument list, each with an optional leading combinator.
    fn parse_relative_list(&mut self) -> Result<Vec<RelativeSelector>, SelectorError> {
        let mut list = Vec::new();
        loop {
            self.skip_whitespace();
            let combinator = match self.peek() {
                Some('>') => Combinator::Child,
                Some('+') => Combinator::AdjacentSibling,
                Some('~') => Combinator::GeneralSibling,
                _ => Combinator::Descendant,
            };
            if combinator != Combinator::Descendant {
                self.pos += 1;
                self.skip_whitespace();
            }
            let selector = self.parse_complex()?;
            list.push(RelativeSelector {
                combinator,
                selector,
            });
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => return Ok(list),
                None => return Err(self.error("unclosed '('")),
                Some(ch) => return Err(self.error(format!("unexpected '{}'", ch))),
            }
        }
    }

    fn parse_compound(&mut self) -> Result<CompoundSelector, SelectorError> {
        let mut compound = CompoundSelector::default();
        let mut empty = !self.parse_type_selector(&mut compound)?;
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    let id = self.parse_identifier()?;
                    compound.ids.push(id);
                }
                Some('.') => {
                    self.pos += 1;
                    let class = self.parse_identifier()?;
                    compound.classes.push(class);
                }
                Some('[') => {
                    let attribute = self.parse_attribute()?;
                    compound.attributes.push(attribute);
                }
                Some(':') => self.parse_pseudo(&mut compound)?,
                _ => break,
            }
            empty = false;
        }
        if empty {
            return Err(match self.peek() {
                Some(ch) => self.error(format!("expected a selector, found '{}'", ch)),
                None => self.error("expected a selector"),
            });
        }
        Ok(compound)
    }

    /// Reads `tag`, `*`, `ns|tag`, `*|*` or `|tag`. Returns whether anything was read.
    fn parse_type_selector(&mut self, compound: &mut CompoundSelector) -> Result<bool, SelectorError> {
        let universal = self.eat('*');
        let name = if !universal && self.starts_identifier() {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        // `|=` after nothing belongs to an attribute selector, never to a type selector.
        if self.peek() != Some('|') || self.peek_at(1) == Some('=') {
            let read = universal || name.is_some();
            compound.tag = name;
            return Ok(read);
        }
        self.pos += 1; // '|'
        compound.namespace = Some(match name {
            Some(prefix) => prefix,
            None if universal => "*".to_string(),
            None => String::new(),
        });
        if !self.eat('*') {
            compound.tag = Some(self.parse_identifier()?);
        }
        Ok(true)
    }

    fn starts_identifier(&self) -> bool {
        match self.peek() {
            Some('\\') => true,
            Some('-') => matches!(self.peek_at(1), Some(ch) if is_name_start(ch) || ch == '-' || ch == '\\'),
            Some(ch) => is_name_start(ch),
            None => false,
        }
    }

    fn parse_identifier(&mut self) -> Result<String, SelectorError> {
        if !self.starts_identifier() {
            return Err(self.error("expected an identifier"));
        }
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.pos += 1;
                ident.push(self.parse_escape()?);
            } else if is_name_char(ch) {
                ident.push(ch);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(ident)
    }

    /// Reads the part after a backslash: up to six hex digits, or one literal char.
    fn parse_escape(&mut self) -> Result<char, SelectorError> {
        let mut hex = String::new();
        while hex.len() < 6 {
            match self.peek() {
                Some(ch) if ch.is_ascii_hexdigit() => {
                    hex.push(ch);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if hex.is_empty() {
            return self.bump().ok_or_else(|| self.error("dangling escape"));
        }
        if matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
            self.pos += 1;
        }
        let code = u32::from_str_radix(&hex, 16).unwrap_or(0xFFFD);
        Ok(char::from_u32(code)
            .filter(|&ch| ch != '\0')
            .unwrap_or('\u{FFFD}'))
    }

    fn parse_string(&mut self, quote: char) -> Result<String, SelectorError> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(ch) if ch == quote => return Ok(value),
                Some('\\') => {
                    if self.eat('\n') {
                        continue;
                    }
                    value.push(self.parse_escape()?);
                }
                Some(ch) => value.push(ch),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn parse_attribute(&mut self) -> Result<AttributeSelector, SelectorError> {
        self.pos += 1; // '['
        self.skip_whitespace();
        let name = self.parse_identifier()?;
        self.skip_whitespace();
        let operator = match (self.peek(), self.peek_at(1)) {
            (Some(']'), _) => {
                self.pos += 1;
                return Ok(AttributeSelector {
                    name,
                    operator: None,
                    value: None,
                    case_insensitive: false,
                });
            }
            (Some('='), _) => {
                self.pos += 1;
                AttributeOperator::Exact
            }
            (Some(op), Some('=')) => {
                let operator = match op {
                    '~' => AttributeOperator::Includes,
                    '|' => AttributeOperator::DashMatch,
                    '^' => AttributeOperator::Prefix,
                    '$' => AttributeOperator::Suffix,
                    '*' => AttributeOperator::Substring,
                    _ => return Err(self.error(format!("unknown attribute operator '{}='", op))),
                };
                self.pos += 2;
                operator
            }
            _ => return Err(self.error("malformed attribute selector")),
        };
        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => self.parse_string(quote)?,
            _ => self.parse_identifier()?,
        };
        self.skip_whitespace();
        let case_insensitive = match self.peek() {
            Some('i') | Some('I') => {
                self.pos += 1;
                true
            }
            Some('s') | Some('S') => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        self.skip_whitespace();
        if !self.eat(']') {
            return Err(self.error("expected ']'"));
        }
        Ok(AttributeSelector {
            name,
            operator: Some(operator),
            value: Some(value),
            case_insensitive,
        })
    }

    fn parse_pseudo(&mut self, compound: &mut CompoundSelector) -> Result<(), SelectorError> {
        self.pos += 1; // ':'
        if self.eat(':') {
            let name = self.parse_identifier()?.to_ascii_lowercase();
            if self.eat('(') {
                self.skip_arguments()?;
            }
            compound.pseudo_element = Some(name);
            return Ok(());
        }
        let name = self.parse_identifier()?.to_ascii_lowercase();
        let pseudo = if self.eat('(') {
            self.parse_functional_pseudo(&name)?
        } else {
            match name.as_str() {
                // Outside `@scope` the scoping root is the document root.
                "root" | "scope" => PseudoClass::Root,
                "defined" => PseudoClass::Defined,
                "empty" => PseudoClass::Empty,
                "first-child" => PseudoClass::FirstChild,
                "last-child" => PseudoClass::LastChild,
                "only-child" => PseudoClass::OnlyChild,
                "first-of-type" => PseudoClass::FirstOfType,
                "last-of-type" => PseudoClass::LastOfType,
                "only-of-type" => PseudoClass::OnlyOfType,
                other if LEGACY_PSEUDO_ELEMENTS.contains(&other) => {
                    compound.pseudo_element = Some(name.clone());
                    return Ok(());
                }
                other if DYNAMIC_PSEUDO_CLASSES.contains(&other) => {
                    PseudoClass::Dynamic(name.clone())
                }
                _ => PseudoClass::Unknown(name.clone()),
            }
        };
        compound.pseudo_classes.push(pseudo);
        Ok(())
    }

    /// Called with the opening `(` already consumed; consumes the closing `)`.
    fn parse_functional_pseudo(&mut self, name: &str) -> Result<PseudoClass, SelectorError> {
        let pseudo = match name {
            "not" | "is" | "where" | "matches" => {
                let list = self.parse_list(true)?;
                match name {
                    "not" => PseudoClass::Not(list),
                    "where" => PseudoClass::Where(list),
                    _ => PseudoClass::Is(list),
                }
            }
            "has" => PseudoClass::Has(self.parse_relative_list()?),
            "nth-child" | "nth-last-child" => {
                let start = self.pos;
                self.skip_arguments()?;
                let text: String = self.chars[start..self.pos - 1].iter().collect();
                let (nth_text, of) = split_of_clause(&text);
                let nth = Nth::parse(nth_text)
                    .ok_or_else(|| self.error(format!("invalid :{}() argument {:?}", name, text)))?;
                let pseudo = match of {
                    Some(list) => {
                        let list = parse_selector_list(list).map_err(|err| self.error(err.reason))?;
                        match name {
                            "nth-child" => PseudoClass::NthChildOf(nth, list),
                            _ => PseudoClass::NthLastChildOf(nth, list),
                        }
                    }
                    None if name == "nth-child" => PseudoClass::NthChild(nth),
                    None => PseudoClass::NthLastChild(nth),
                };
                return Ok(pseudo);
            }
            "nth-of-type" | "nth-last-of-type" => {
                let start = self.pos;
                while !matches!(self.peek(), Some(')') | None) {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                let nth = Nth::parse(&text)
                    .ok_or_else(|| self.error(format!("invalid :{}() argument {:?}", name, text)))?;
                match name {
                    "nth-of-type" => PseudoClass::NthOfType(nth),
                    _ => PseudoClass::NthLastOfType(nth),
                }
            }
            "lang" | "dir" => {
                self.skip_arguments()?;
                return Ok(PseudoClass::Dynamic(name.to_string()));
            }
            _ => {
                self.skip_arguments()?;
                return Ok(PseudoClass::Unknown(format!("{}()", name)));
            }
        };
        if !self.eat(')') {
            return Err(self.error("expected ')'"));
        }
        Ok(pseudo)
    }

    /// Skips to just past the `)` that closes an already opened argument list.
    fn skip_arguments(&mut self) -> Result<(), SelectorError> {
        let mut depth = 1;
        while let Some(ch) = self.bump() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unclosed '('"))
    }
}

/// Splits `2n+1 of .bar` at the standalone `of` keyword.
fn split_of_clause(text: &str) -> (&str, Option<&str>) {
    let bounded = |index: usize, len: usize| {
        let before = text[..index].chars().next_back();
        let after = text[index + len..].chars().next();
        before.map_or(false, char::is_whitespace) && after.map_or(false, char::is_whitespace)
    };
    match text
        .match_indices("of")
        .find(|(index, of)| bounded(*index, of.len()))
    {
        Some((index, _)) => (&text[..index], Some(&text[index + 2..])),
        None => (text, None),
    }
}

/// ------------------------------
/// 2. Specificity & Cascade
/// ------------------------------

/// Compute specificity for a compound selector as (id_count, class+attribute+pseudo_count, tag_count)
pub fn compute_specificity(compound: &CompoundSelector) -> (u32, u32, u32) {
    let mut spec = (
        compound.ids.len() as u32,
        (compound.classes.len() + compound.attributes.len()) as u32,
        u32::from(compound.tag.is_some()) + u32::from(compound.pseudo_element.is_some()),
    );
    for pseudo in &compound.pseudo_classes {
        match pseudo {
            PseudoClass::Not(list) | PseudoClass::Is(list) => {
                // The most specific argument counts.
                add_max_specificity(&mut spec, list.iter());
            }
            PseudoClass::Has(list) => {
                add_max_specificity(&mut spec, list.iter().map(|relative| &relative.selector));
            }
            PseudoClass::NthChildOf(_, list) | PseudoClass::NthLastChildOf(_, list) => {
                spec.1 += 1;
                add_max_specificity(&mut spec, list.iter());
            }
            PseudoClass::Where(_) => {}
            _ => spec.1 += 1,
        }
    }
    spec
}

fn add_max_specificity<'a>(
    spec: &mut (u32, u32, u32),
    list: impl Iterator<Item = &'a ComplexSelector>,
) {
    let inner = list.map(compute_complex_specificity).max().unwrap_or_default();
    spec.0 += inner.0;
    spec.1 += inner.1;
    spec.2 += inner.2;
}

/// Compute specificity for a complex selector by summing key and ancestors.
pub fn compute_complex_specificity(selector: &ComplexSelector) -> (u32, u32, u32) {
    let mut spec = compute_specificity(&selector.key);
    for (_, comp) in &selector.ancestors {
        let anc_spec = compute_specificity(comp);
        spec.0 += anc_spec.0;
        spec.1 += anc_spec.1;
        spec.2 += anc_spec.2;
    }
    spec
}

/// Represents a CSS rule.
#[derive(Debug, Clone)]
pub struct CssRule {
    pub selector: ComplexSelector,
    /// Declarations: property -> value
    pub declarations: HashMap<String, String>,
    pub source_order: u32,
}

/// Rules from `rules` whose selector matches `node`.
pub fn matching_rules(node: &NodeRef, rules: &[CssRule]) -> Vec<CssRule> {
    rules
        .iter()
        .filter(|rule| matches_complex_selector(node, &rule.selector))
        .cloned()
        .collect()
}

/// Compute the final computed style for an element by merging matched rules,
/// sorting by specificity and source order, and then applying inheritance.
/// `parent_style` is the computed style of the parent, if any.
pub fn compute_computed_style(
    matched_rules: Vec<CssRule>,
    parent_style: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut rules = matched_rules;
    rules.sort_by(|a, b| {
        let spec_a = compute_complex_specificity(&a.selector);
        let spec_b = compute_complex_specificity(&b.selector);
        let cmp_spec = spec_a.cmp(&spec_b);
        if cmp_spec == Ordering::Equal {
            a.source_order.cmp(&b.source_order)
        } else {
            cmp_spec
        }
    });
    let mut computed: HashMap<String, String> = HashMap::new();
    for rule in rules {
        for (prop, value) in rule.declarations {
            computed.insert(prop, value);
        }
    }
    let inheritable = [
        "color",
        "fill",
        "stroke",
        "font-size",
        "font-family",
        "font-style",
        "font-weight",
        "line-height",
        "text-anchor",
        "visibility",
        "letter-spacing",
        "word-spacing",
        "direction",
    ];
    if let Some(parent) = parent_style {
        for prop in inheritable.iter() {
            if !computed.contains_key(*prop) {
                if let Some(val) = parent.get(*prop) {
                    computed.insert((*prop).to_string(), val.clone());
                }
            }
        }
    }
    computed
}

/// ------------------------------
/// 3. Selector Matching
/// ------------------------------

/// Returns true if the element matches the compound selector: tag, ids, classes, attribute
/// conditions and pseudo-classes.
pub fn matches_compound(node: &NodeRef, compound: &CompoundSelector) -> bool {
    let simple = match &*node.borrow() {
        Node::Element(elem) => matches_simple(elem, compound),
        _ => false,
    };
    simple
        && compound
            .pseudo_classes
            .iter()
            .all(|pseudo| matches_pseudo_class(node, pseudo))
}

fn matches_simple(elem: &ElementNode, compound: &CompoundSelector) -> bool {
    if compound.pseudo_element.is_some() {
        return false;
    }
    // No `@namespace` prefixes are declared, so only `*|` matches.
    if matches!(compound.namespace.as_deref(), Some(prefix) if prefix != "*") {
        return false;
    }
    if let Some(ref tag) = compound.tag {
        // HTML names are case-insensitive; SVG keeps camelCase names like `linearGradient`.
        let same = if elem.is_html() {
            elem.tag.eq_ignore_ascii_case(tag)
        } else {
            elem.tag == *tag
        };
        if !same {
            return false;
        }
    }
    if !compound.ids.is_empty() {
        match elem.get_attribute("id") {
            Some(elem_id) if compound.ids.iter().all(|id| id == elem_id) => {}
            _ => return false,
        }
    }
    if !compound
        .classes
        .iter()
        .all(|class| elem.classes().any(|c| c == class))
    {
        return false;
    }
    compound
        .attributes
        .iter()
        .all(|attr_sel| matches_attribute(elem, attr_sel))
}

fn matches_attribute(elem: &ElementNode, attr_sel: &AttributeSelector) -> bool {
    // Attribute names fold case on HTML elements only; SVG keeps `viewBox` distinct.
    let html = elem.is_html();
    let actual_val = match elem.attributes.iter().find(|(name, _)| {
        if html {
            name.eq_ignore_ascii_case(&attr_sel.name)
        } else {
            *name == attr_sel.name
        }
    }) {
        Some((_, value)) => value,
        None => return false,
    };
    let (operator, expected) = match (&attr_sel.operator, &attr_sel.value) {
        (Some(operator), Some(expected)) => (operator, expected),
        // No operator means just existence; already confirmed.
        _ => return true,
    };
    let (actual_val, expected) = if attr_sel.case_insensitive {
        (actual_val.to_lowercase(), expected.to_lowercase())
    } else {
        (actual_val.clone(), expected.clone())
    };
    match operator {
        AttributeOperator::Exact => actual_val == expected,
        AttributeOperator::Includes => {
            !expected.is_empty()
                && !expected.contains(char::is_whitespace)
                && actual_val.split_whitespace().any(|word| word == expected)
        }
        AttributeOperator::DashMatch => {
            actual_val == expected || actual_val.starts_with(&format!("{}-", expected))
        }
        AttributeOperator::Prefix => !expected.is_empty() && actual_val.starts_with(&expected),
        AttributeOperator::Suffix => !expected.is_empty() && actual_val.ends_with(&expected),
        AttributeOperator::Substring => !expected.is_empty() && actual_val.contains(&expected),
    }
}

fn matches_pseudo_class(node: &NodeRef, pseudo: &PseudoClass) -> bool {
    match pseudo {
        PseudoClass::Root => parent_element(node).is_none(),
        PseudoClass::Empty => children(node).iter().all(|child| match &*child.borrow() {
            Node::Comment(_) => true,
            Node::Text(text) | Node::CData(text) => text.is_empty(),
            _ => false,
        }),
        PseudoClass::FirstChild => sibling_position(node, false, false) == 1,
        PseudoClass::LastChild => sibling_position(node, false, true) == 1,
        PseudoClass::OnlyChild => {
            sibling_position(node, false, false) == 1 && sibling_position(node, false, true) == 1
        }
        PseudoClass::FirstOfType => sibling_position(node, true, false) == 1,
        PseudoClass::LastOfType => sibling_position(node, true, true) == 1,
        PseudoClass::OnlyOfType => {
            sibling_position(node, true, false) == 1 && sibling_position(node, true, true) == 1
        }
        PseudoClass::NthChild(nth) => nth.matches(sibling_position(node, false, false)),
        PseudoClass::NthLastChild(nth) => nth.matches(sibling_position(node, false, true)),
        PseudoClass::NthOfType(nth) => nth.matches(sibling_position(node, true, false)),
        PseudoClass::NthLastOfType(nth) => nth.matches(sibling_position(node, true, true)),
        PseudoClass::NthChildOf(nth, list) => {
            matches_selector_list(node, list) && nth.matches(filtered_position(node, list, false))
        }
        PseudoClass::NthLastChildOf(nth, list) => {
            matches_selector_list(node, list) && nth.matches(filtered_position(node, list, true))
        }
        PseudoClass::Not(list) => !matches_selector_list(node, list),
        PseudoClass::Is(list) | PseudoClass::Where(list) => matches_selector_list(node, list),
        PseudoClass::Has(list) => list.iter().any(|relative| matches_relative(node, relative)),
        PseudoClass::Defined => true,
        PseudoClass::Dynamic(_) | PseudoClass::Unknown(_) => false,
    }
}

/// Whether some element reached from `anchor` through the relative selector matches it.
fn matches_relative(anchor: &NodeRef, relative: &RelativeSelector) -> bool {
    // Left-to-right steps; each combinator leads from the previous step to its compound.
    let mut steps = Vec::with_capacity(relative.selector.ancestors.len() + 1);
    let mut combinator = relative.combinator;
    for (next, compound) in relative.selector.ancestors.iter().rev() {
        steps.push((combinator, compound));
        combinator = *next;
    }
    steps.push((combinator, &relative.selector.key));
    matches_forward(anchor, &steps)
}

fn matches_forward(node: &NodeRef, steps: &[(Combinator, &CompoundSelector)]) -> bool {
    let ((combinator, compound), rest) = match steps.split_first() {
        Some(first) => first,
        None => return true,
    };
    let candidates = match combinator {
        Combinator::Child => element_children(node),
        Combinator::Descendant => descendants(node),
        Combinator::AdjacentSibling => following_siblings(node).into_iter().take(1).collect(),
        Combinator::GeneralSibling => following_siblings(node),
    };
    candidates
        .iter()
        .any(|candidate| matches_compound(candidate, compound) && matches_forward(candidate, rest))
}

/// True if any selector in the list matches.
pub fn matches_selector_list(node: &NodeRef, list: &[ComplexSelector]) -> bool {
    list.iter()
        .any(|selector| matches_complex_selector(node, selector))
}

/// Matches a ComplexSelector against a candidate element.
/// The matching proceeds right-to-left and backtracks when an ancestor or sibling choice fails.
pub fn matches_complex_selector(candidate: &NodeRef, complex: &ComplexSelector) -> bool {
    matches_compound(candidate, &complex.key) && matches_ancestors(candidate, &complex.ancestors)
}

fn matches_ancestors(node: &NodeRef, ancestors: &[(Combinator, CompoundSelector)]) -> bool {
    let ((combinator, compound), rest) = match ancestors.split_first() {
        Some(first) => first,
        None => return true,
    };
    let accept = |other: &NodeRef| matches_compound(other, compound) && matches_ancestors(other, rest);
    match combinator {
        Combinator::Child => parent_element(node).map_or(false, |p| accept(&p)),
        Combinator::Descendant => {
            let mut ancestor = parent_element(node);
            while let Some(current) = ancestor {
                if accept(&current) {
                    return true;
                }
                ancestor = parent_element(&current);
            }
            false
        }
        Combinator::AdjacentSibling => previous_siblings(node)
            .first()
            .map_or(false, |sibling| accept(sibling)),
        Combinator::GeneralSibling => previous_siblings(node).iter().any(accept),
    }
}

/// Helper: parent when it is an element (the document root does not count).
fn parent_element(node: &NodeRef) -> Option<NodeRef> {
    parent(node).filter(|p| matches!(*p.borrow(), Node::Element(_)))
}

/// Helper: element siblings including `node` itself, in document order.
fn sibling_elements(node: &NodeRef) -> Vec<NodeRef> {
    match parent(node) {
        Some(p) => element_children(&p),
        None => vec![Rc::clone(node)],
    }
}

/// Helper: previous element siblings, nearest first.
fn previous_siblings(node: &NodeRef) -> Vec<NodeRef> {
    let siblings = sibling_elements(node);
    let index = siblings
        .iter()
        .position(|s| Rc::ptr_eq(s, node))
        .unwrap_or(0);
    siblings[..index].iter().rev().cloned().collect()
}

/// Helper: following element siblings, nearest first.
fn following_siblings(node: &NodeRef) -> Vec<NodeRef> {
    let siblings = sibling_elements(node);
    match siblings.iter().position(|s| Rc::ptr_eq(s, node)) {
        Some(index) => siblings[index + 1..].to_vec(),
        None => Vec::new(),
    }
}

/// Helper: 1-based position among the siblings matching `list`, counted from the end when
/// `from_end`.
fn filtered_position(node: &NodeRef, list: &[ComplexSelector], from_end: bool) -> usize {
    let mut candidates: Vec<NodeRef> = sibling_elements(node)
        .into_iter()
        .filter(|s| matches_selector_list(s, list))
        .collect();
    if from_end {
        candidates.reverse();
    }
    candidates
        .iter()
        .position(|s| Rc::ptr_eq(s, node))
        .map_or(0, |i| i + 1)
}

/// Helper: 1-based position among siblings (optionally only those with the same tag), counted
/// from the end when `from_end`. 0 if the node is not among its parent's children.
fn sibling_position(node: &NodeRef, of_type: bool, from_end: bool) -> usize {
    let tag = tag_name(node);
    let mut candidates: Vec<NodeRef> = sibling_elements(node)
        .into_iter()
        .filter(|s| !of_type || tag_name(s) == tag)
        .collect();
    if from_end {
        candidates.reverse();
    }
    candidates
        .iter()
        .position(|s| Rc::ptr_eq(s, node))
        .map_or(0, |i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::dom_tree::{descendants, get_attribute};
    use crate::parser::html::create_dom_tree;
    use pretty_assertions::assert_eq;

    const CHART: &str = r#"<html><body>
        <svg id="chart" class="plot dark" data-kind="bar-chart" viewBox="0 0 40 10">
          <g class="axis"><text id="t1" lang="en-US">a</text><text id="t2"></text></g>
          <g class="bars">
            <rect id="r1" class="bar first" width="10"/>
            <rect id="r2" class="bar"/>
            <circle id="c1"/>
            <rect id="r3" class="bar last"/>
          </g>
        </svg></body></html>"#;

    fn by_id(root: &NodeRef, id: &str) -> NodeRef {
        descendants(root)
            .into_iter()
            .find(|n| get_attribute(n, "id").as_deref() == Some(id))
            .unwrap()
    }

    fn matches(root: &NodeRef, id: &str, selector: &str) -> bool {
        let list = parse_selector_list(selector).unwrap();
        matches_selector_list(&by_id(root, id), &list)
    }

    // Helper to create a CssRule from selector text and declarations.
    fn make_rule(selector: &str, decls: &[(&str, &str)], source_order: u32) -> CssRule {
        CssRule {
            selector: parse_complex_selector(selector).unwrap(),
            declarations: decls
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            source_order,
        }
    }

    #[test]
    fn test_combinators() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "r1", "svg rect"));
        assert!(matches(root, "r1", "svg > .bars > rect"));
        assert!(!matches(root, "r1", "svg > rect"));
        assert!(matches(root, "r2", ".first + rect"));
        assert!(matches(root, "r3", ".first ~ .last"));
        assert!(!matches(root, "r3", "circle + rect + rect"));
        assert!(matches(root, "t2", ".axis text + text"));
        // Needs backtracking: the nearest `g` is .bars, the match is through the svg.
        assert!(matches(root, "r2", ".plot g > rect.bar"));
        assert!(matches(root, "r2", "svg.dark g rect"));
    }

    #[test]
    fn test_attribute_operators() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "chart", "[data-kind]"));
        assert!(matches(root, "chart", "[data-kind=\"bar-chart\"]"));
        assert!(matches(root, "chart", "[class~=dark]"));
        assert!(matches(root, "chart", "[data-kind^=bar]"));
        assert!(matches(root, "chart", "[data-kind$='chart']"));
        assert!(matches(root, "chart", "[data-kind*=\"r-c\"]"));
        assert!(matches(root, "chart", "[data-kind=BAR-CHART i]"));
        assert!(matches(root, "t1", "[lang|=en]"));
        assert!(!matches(root, "t1", "[lang|=e]"));
        assert!(!matches(root, "chart", "[data-kind^='']"));
    }

    #[test]
    fn test_structural_pseudo_classes() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "r1", "rect:first-child"));
        assert!(matches(root, "r3", "rect:last-of-type"));
        assert!(matches(root, "c1", "circle:only-of-type"));
        assert!(matches(root, "r3", ":nth-child(4)"));
        assert!(matches(root, "r3", "rect:nth-of-type(odd)"));
        assert!(matches(root, "r2", "rect:nth-of-type(2n)"));
        assert!(matches(root, "r1", ":nth-last-child(-n+4)"));
        assert!(!matches(root, "r1", ":nth-last-child(-n+3)"));
        assert!(matches(root, "t2", "text:empty"));
        assert!(matches(root, "r2", "rect:not(.first, .last)"));
        assert!(matches(root, "c1", ":is(circle, ellipse)"));
        assert!(!matches(root, "r1", "rect:hover"));
        assert!(!matches(root, "r1", "rect::before"));
    }

    #[test]
    fn test_invalid_selectors() {
        for selector in ["", "rect >", "[width=100]", "a,,b", ":not()", "svg|", ":has()", ":nth-child(2 of )"] {
            assert!(
                parse_selector_list(selector).is_err(),
                "{:?} should not parse",
                selector
            );
        }
        let err = parse_selector_list("rect >").unwrap_err();
        assert_eq!(err.reason, "expected a selector");
    }

    #[test]
    fn test_unknown_pseudo_classes_parse_but_never_match() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(parse_selector_list("rect:frobnicate, :future-thing(a b), ::part(x)").is_ok());
        assert!(!matches(root, "r1", "rect:frobnicate"));
        assert!(!matches(root, "r1", "rect:future-thing(a (b))"));
        assert!(matches(root, "r1", "rect:frobnicate, .first"));
        assert!(matches(root, "r1", "rect:defined"));
    }

    #[test]
    fn test_has() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "chart", "svg:has(circle)"));
        assert!(matches(root, "chart", "svg:has(> g > circle)"));
        assert!(!matches(root, "chart", "svg:has(> circle)"));
        assert!(matches(root, "r2", "rect:has(+ circle)"));
        assert!(!matches(root, "r1", "rect:has(+ circle)"));
        assert!(matches(root, "r1", "rect:has(~ circle)"));
        assert!(!matches(root, "r3", "rect:has(~ circle)"));
        assert!(matches(root, "chart", "svg:has(.axis + .bars > rect.last)"));
        assert!(!matches(root, "chart", "svg:has(.bars + .axis)"));
        assert!(matches(root, "chart", "svg:has(ellipse, text:empty)"));
        assert!(!matches(root, "t1", ":has(*)"));
        assert_eq!(
            compute_complex_specificity(&parse_complex_selector("svg:has(#r1, rect)").unwrap()),
            (1, 0, 1)
        );
    }

    #[test]
    fn test_nth_child_of_selector() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "r3", ":nth-child(3 of .bar)"));
        assert!(!matches(root, "r3", ":nth-child(3)"));
        assert!(matches(root, "r2", "rect:nth-child(2 of rect)"));
        assert!(matches(root, "r3", ":nth-last-child(1 of .bar)"));
        assert!(matches(root, "r3", ":nth-child(odd of rect)"));
        assert!(!matches(root, "c1", ":nth-child(3 of .bar)"));
        assert_eq!(
            compute_complex_specificity(&parse_complex_selector(":nth-child(2 of .bar)").unwrap()),
            (0, 2, 0)
        );
    }

    #[test]
    fn test_namespaced_type_selectors() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "r1", "*|rect"));
        assert!(matches(root, "r1", "*|*.first"));
        assert!(!matches(root, "r1", "svg|rect"));
        assert!(!matches(root, "r1", "|rect"));
        assert_eq!(
            parse_complex_selector("svg|rect").unwrap().key,
            CompoundSelector {
                namespace: Some("svg".into()),
                tag: Some("rect".into()),
                ..CompoundSelector::default()
            }
        );
    }

    #[test]
    fn test_attribute_names_fold_case_on_html_only() {
        let doc = create_dom_tree(CHART);
        let root = &doc.root;
        assert!(matches(root, "chart", "[viewBox]"));
        assert!(!matches(root, "chart", "[viewbox]"));
        assert!(!matches(root, "chart", "[DATA-KIND]"));

        let page = create_dom_tree(r#"<div id="d" data-x="1"></div>"#);
        assert!(matches(&page.root, "d", "[DATA-X]"));
        assert!(matches(&page.root, "d", "div[data-x='1']"));
    }

    #[test]
    fn test_nth_parsing() {
        assert_eq!(Nth::parse("odd"), Some(Nth { step: 2, offset: 1 }));
        assert_eq!(Nth::parse(" -n + 3 "), Some(Nth { step: -1, offset: 3 }));
        assert_eq!(Nth::parse("5"), Some(Nth { step: 0, offset: 5 }));
        assert_eq!(Nth::parse("2n1"), None);
    }

    // Test that a rule with higher specificity (ID selector) wins.
    #[test]
    fn test_specificity_wins() {
        let rule1 = make_rule("svg", &[("width", "100px")], 2);
        let rule2 = make_rule("#chart", &[("width", "300px")], 1);
        let computed = compute_computed_style(vec![rule1, rule2], None);
        assert_eq!(computed.get("width"), Some(&"300px".to_string()));
        assert_eq!(
            compute_complex_specificity(&parse_complex_selector("svg :is(#a, .b) rect:where(.c)").unwrap()),
            (1, 0, 2)
        );
    }

    // Test that when specificity is equal, source order wins.
    #[test]
    fn test_source_order() {
        let rule_a = make_rule(".plot", &[("height", "12px")], 1);
        let rule_b = make_rule(".dark", &[("height", "14px")], 2);
        let computed = compute_computed_style(vec![rule_b, rule_a], None);
        assert_eq!(computed.get("height"), Some(&"14px".to_string()));
    }

    // Inheritable properties come from the parent when the child leaves them unset.
    #[test]
    fn test_inheritance() {
        let parent_style: HashMap<String, String> = [
            ("fill".to_string(), "red".to_string()),
            ("width".to_string(), "10px".to_string()),
        ]
        .into_iter()
        .collect();
        let computed = compute_computed_style(vec![], Some(&parent_style));
        assert_eq!(computed.get("fill"), Some(&"red".to_string()));
        assert_eq!(computed.get("width"), None);
    }

    #[test]
    fn test_matching_rules_filters() {
        let doc = create_dom_tree(CHART);
        let rules = vec![
            make_rule("rect", &[("fill", "blue")], 1),
            make_rule("circle", &[("fill", "green")], 2),
        ];
        let matched = matching_rules(&by_id(&doc.root, "c1"), &rules);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].source_order, 2);
    }
}
