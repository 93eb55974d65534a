//! Dynamically-typed symbol table.
//!
//! Symbols are kept in definition order. Lookups scan from the newest entry
//! backward and compare names case-insensitively, so a later definition
//! shadows every older one with the same name.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a symbol's value buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Referenced but never assigned.
    None,
    Int,
    Double,
    String,
}

/// A typed value buffer. One element is a scalar, more is a vector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum SymbolValue {
    #[default]
    None,
    Int(Vec<i64>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl SymbolValue {
    pub fn dtype(&self) -> DataType {
        match self {
            SymbolValue::None => DataType::None,
            SymbolValue::Int(_) => DataType::Int,
            SymbolValue::Double(_) => DataType::Double,
            SymbolValue::String(_) => DataType::String,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            SymbolValue::None => 0,
            SymbolValue::Int(v) => v.len(),
            SymbolValue::Double(v) => v.len(),
            SymbolValue::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen an `Int` buffer to `Double` in place. Any other type is left
    /// unchanged; there is no way back to `Int`.
    pub fn promote_to_double(&mut self) {
        if let SymbolValue::Int(values) = self {
            let widened = values.iter().map(|&v| v as f64).collect();
            *self = SymbolValue::Double(widened);
        }
    }

    /// The value as a number, if it is a numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SymbolValue::Int(v) if v.len() == 1 => Some(v[0] as f64),
            SymbolValue::Double(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = match self {
            SymbolValue::None => return f.write_str("nil"),
            SymbolValue::Int(v) => v.iter().map(|x| x.to_string()).collect(),
            SymbolValue::Double(v) => v.iter().map(|x| x.to_string()).collect(),
            SymbolValue::String(v) => v.iter().map(|s| format!("\"{}\"", s)).collect(),
        };
        if items.len() == 1 {
            f.write_str(&items[0])
        } else {
            write!(f, "({})", items.join(", "))
        }
    }
}

/// A named, typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub value: SymbolValue,
}

impl Symbol {
    /// A symbol without a value.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, SymbolValue::None)
    }

    pub fn with_value(name: impl Into<String>, value: SymbolValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::with_value(name, SymbolValue::Int(vec![value]))
    }

    pub fn ints(name: impl Into<String>, values: impl Into<Vec<i64>>) -> Self {
        Self::with_value(name, SymbolValue::Int(values.into()))
    }

    pub fn double(name: impl Into<String>, value: f64) -> Self {
        Self::with_value(name, SymbolValue::Double(vec![value]))
    }

    pub fn doubles(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self::with_value(name, SymbolValue::Double(values.into()))
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_value(name, SymbolValue::String(vec![value.into()]))
    }

    pub fn strings(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::with_value(name, SymbolValue::String(values))
    }

    pub fn dtype(&self) -> DataType {
        self.value.dtype()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Case-insensitive name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Overwrite name and value from `src`. When both hold the same type the
    /// existing buffer is reused and only grows if it is too small.
    pub fn copy_from(&mut self, src: &Symbol) {
        self.name.clone_from(&src.name);
        match (&mut self.value, &src.value) {
            (SymbolValue::Int(dst), SymbolValue::Int(src)) => dst.clone_from(src),
            (SymbolValue::Double(dst), SymbolValue::Double(src)) => dst.clone_from(src),
            (SymbolValue::String(dst), SymbolValue::String(src)) => dst.clone_from(src),
            (dst, src) => *dst = src.clone(),
        }
    }

    /// Exchange name and value with `other`.
    pub fn swap(&mut self, other: &mut Symbol) {
        std::mem::swap(&mut self.name, &mut other.name);
        std::mem::swap(&mut self.value, &mut other.value);
    }

    pub fn promote_to_double(&mut self) {
        self.value.promote_to_double();
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dtype = match self.dtype() {
            DataType::None => "none",
            DataType::Int => "int",
            DataType::Double => "double",
            DataType::String => "string",
        };
        write!(f, "{} ({}) {}", self.name, dtype, self.value)
    }
}

/// Name-shadowing symbol store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    // Oldest first; the last entry is the newest definition.
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the newest symbol named `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.symbols.iter().rposition(|s| s.is_named(name))
    }

    /// Find the newest symbol named `name` without creating anything.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.index_of(name).map(|i| &self.symbols[i])
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.index_of(name).map(move |i| &mut self.symbols[i])
    }

    /// Find the newest symbol named `name`, creating an untyped placeholder
    /// as the newest entry when none exists.
    pub fn lookup_or_create(&mut self, name: &str) -> &mut Symbol {
        let index = match self.index_of(name) {
            Some(index) => index,
            None => {
                self.symbols.push(Symbol::new(name));
                self.symbols.len() - 1
            }
        };
        &mut self.symbols[index]
    }

    /// Add `symbol` as the newest entry, shadowing older ones of that name.
    pub fn push(&mut self, symbol: Symbol) -> &mut Symbol {
        self.symbols.push(symbol);
        let last = self.symbols.len() - 1;
        &mut self.symbols[last]
    }

    pub fn get(&self, index: usize) -> Option<&Symbol> {
        self.symbols.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Symbol> {
        self.symbols.get_mut(index)
    }

    /// Exchange the contents of the entries at two positions. Positions
    /// themselves do not move.
    ///
    /// # Panics
    ///
    /// Panics if `a` or `b` is out of bounds, like [`slice::swap`].
    pub fn swap(&mut self, a: usize, b: usize) {
        let len = self.symbols.len();
        assert!(
            a < len && b < len,
            "symbol index out of bounds: swap({}, {}) with {} symbols",
            a,
            b,
            len
        );
        if a == b {
            return;
        }
        let (low, high) = (a.min(b), a.max(b));
        let (head, tail) = self.symbols.split_at_mut(high);
        head[low].swap(&mut tail[0]);
    }

    /// Symbols, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(table: &SymbolTable) -> Vec<String> {
        table.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_newest_definition_shadows() {
        let mut table = SymbolTable::new();
        table.push(Symbol::int("x", 1));
        table.push(Symbol::double("y", 2.0));
        table.push(Symbol::int("X", 3));

        assert_eq!(table.lookup("x").map(|s| s.value.clone()), Some(SymbolValue::Int(vec![3])));
        assert_eq!(table.lookup_or_create("x").value, SymbolValue::Int(vec![3]));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_lookup_or_create_inserts_placeholder() {
        let mut table = SymbolTable::new();
        assert!(table.lookup("k1").is_none());
        assert!(table.is_empty());

        let symbol = table.lookup_or_create("k1");
        assert_eq!(symbol.dtype(), DataType::None);
        assert_eq!(symbol.len(), 0);
        assert_eq!(table.len(), 1);

        table.lookup_or_create("K1").value = SymbolValue::Double(vec![0.25]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("k1").and_then(|s| s.value.as_f64()), Some(0.25));
    }

    #[test]
    fn test_copy_and_swap_keep_order() {
        let mut table = SymbolTable::new();
        table.push(Symbol::int("a", 1));
        table.push(Symbol::doubles("b", vec![1.0, 2.0]));
        table.push(Symbol::string("c", "QUAD"));

        table.swap(0, 2);
        assert_eq!(names(&table), vec!["a", "b", "c"]);
        assert_eq!(table.get(0).map(|s| s.dtype()), Some(DataType::String));
        assert_eq!(table.get(2).map(|s| s.dtype()), Some(DataType::Int));

        let src = table.get(1).cloned().expect("symbol");
        if let Some(dst) = table.get_mut(0) {
            dst.copy_from(&src);
        }
        assert_eq!(names(&table), vec!["a", "b", "b"]);
        assert_eq!(table.get(0).map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_copy_reuses_buffer() {
        let mut dst = Symbol::doubles("dst", vec![0.0; 8]);
        let src = Symbol::doubles("src", vec![1.5, 2.5]);
        dst.copy_from(&src);

        assert_eq!(dst.name, "src");
        match &dst.value {
            SymbolValue::Double(values) => {
                assert_eq!(values, &vec![1.5, 2.5]);
                assert!(values.capacity() >= 8);
            }
            other => panic!("expected doubles, got {:?}", other),
        }

        let mut dst = Symbol::int("n", 1);
        dst.copy_from(&Symbol::string("s", "x"));
        assert_eq!(dst.dtype(), DataType::String);
    }

    #[test]
    fn test_swap_symbols() {
        let mut a = Symbol::int("a", 7);
        let mut b = Symbol::strings("b", vec!["Q1".into(), "D1".into()]);
        a.swap(&mut b);
        assert_eq!(a.name, "b");
        assert_eq!(a.len(), 2);
        assert_eq!(b.value, SymbolValue::Int(vec![7]));
    }

    #[test]
    fn test_promote_to_double() {
        let mut symbol = Symbol::ints("k", vec![1, 2, 3]);
        symbol.promote_to_double();
        assert_eq!(symbol.dtype(), DataType::Double);
        assert_eq!(symbol.value, SymbolValue::Double(vec![1.0, 2.0, 3.0]));

        symbol.promote_to_double();
        assert_eq!(symbol.value, SymbolValue::Double(vec![1.0, 2.0, 3.0]));

        let mut text = Symbol::string("s", "x");
        text.promote_to_double();
        assert_eq!(text.dtype(), DataType::String);
    }

    #[test]
    #[should_panic(expected = "symbol index out of bounds")]
    fn test_swap_out_of_bounds_panics() {
        let mut table = SymbolTable::new();
        table.push(Symbol::int("a", 1));
        table.swap(0, 3);
    }

    #[test]
    #[should_panic(expected = "symbol index out of bounds")]
    fn test_swap_same_index_out_of_bounds_panics() {
        let mut table = SymbolTable::new();
        table.swap(2, 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(Symbol::doubles("k1", vec![1.0, 2.5]).to_string(), "k1 (double) (1, 2.5)");
        assert_eq!(Symbol::new("u").to_string(), "u (none) nil");
    }
}
