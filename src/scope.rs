//! Label scopes.
//!
//! Labels live in one of three tiers chosen by their prefix: `.loop` is local, `_data` is
//! visible to its file only and `start` is global. A local scope is opened by every global or
//! file label and closed again by `.org`. Named scopes add a prefix-based namespace on top:
//! while a named scope is active, labels starting with its prefix are stored in, and looked up
//! from, that scope first.

use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{error::Result, expr::is_valid_label, AsmError, LineId, Symbols};

/// Names that cannot be used as labels, with their scope prefix removed.
pub const KEYWORDS: &[&str] = &[
    "org",
    "memzone",
    "fill",
    "zero",
    "zerountil",
    "align",
    "byte",
    "2byte",
    "4byte",
    "8byte",
    "cstr",
    "asciiz",
    "include",
    "require",
    "create_memzone",
    "define",
    "if",
    "elif",
    "else",
    "endif",
    "ifdef",
    "ifndef",
    "LSB",
    "BYTE0",
    "BYTE1",
    "BYTE2",
    "BYTE3",
    "BYTE4",
    "BYTE5",
    "BYTE6",
    "BYTE7",
    "BYTE8",
    "BYTE9",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKind {
    Global,
    File,
    Local,
}

impl ScopeKind {
    pub fn of(label: &str) -> Self {
        if label.starts_with('.') {
            ScopeKind::Local
        } else if label.starts_with('_') {
            ScopeKind::File
        } else {
            ScopeKind::Global
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ScopeKind::Global => "",
            ScopeKind::File => "_",
            ScopeKind::Local => ".",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub value: i64,
    pub line: LineId,
}

#[derive(Debug)]
struct ScopeNode {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    reference: String,
    labels: HashMap<String, LabelInfo>,
}

#[derive(Debug)]
pub struct NamedScope {
    pub name: String,
    pub prefix: String,
    pub defined_at: LineId,
    labels: HashMap<String, LabelInfo>,
}

/// Named scopes active at some line, most recently activated first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveScopes {
    names: Vec<String>,
}

impl ActiveScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, name: &str) {
        self.deactivate(name);
        self.names.insert(0, name.to_string());
    }

    pub fn deactivate(&mut self, name: &str) {
        self.names.retain(|active| active != name);
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct LabelScopes {
    nodes: Vec<ScopeNode>,
    files: HashMap<Rc<str>, ScopeId>,
    registers: HashSet<String>,
    named: IndexMap<String, NamedScope>,
}

impl LabelScopes {
    pub fn new(registers: HashSet<String>) -> Self {
        Self {
            nodes: vec![ScopeNode {
                kind: ScopeKind::Global,
                parent: None,
                reference: "--GLOBAL--".to_string(),
                labels: HashMap::new(),
            }],
            files: HashMap::new(),
            registers,
            named: IndexMap::new(),
        }
    }

    pub fn registers(&self) -> &HashSet<String> {
        &self.registers
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn kind(&self, id: ScopeId) -> ScopeKind {
        self.nodes[id.0].kind
    }

    pub fn reference(&self, id: ScopeId) -> &str {
        &self.nodes[id.0].reference
    }

    fn push(&mut self, kind: ScopeKind, parent: ScopeId, reference: &str) -> ScopeId {
        self.nodes.push(ScopeNode {
            kind,
            parent: Some(parent),
            reference: reference.to_string(),
            labels: HashMap::new(),
        });
        ScopeId(self.nodes.len() - 1)
    }

    /// The scope of a source file, created on first use.
    pub fn file_scope(&mut self, file: &Rc<str>) -> ScopeId {
        if let Some(id) = self.files.get(file) {
            return *id;
        }
        let id = self.push(ScopeKind::File, self.global(), file);
        self.files.insert(file.clone(), id);
        id
    }

    /// Opens a fresh local scope under the file scope enclosing `at`.
    pub fn local_scope(&mut self, at: ScopeId, reference: &str) -> ScopeId {
        let mut parent = at;
        while self.nodes[parent.0].kind == ScopeKind::Local {
            match self.nodes[parent.0].parent {
                Some(id) => parent = id,
                None => break,
            }
        }
        self.push(ScopeKind::Local, parent, reference)
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn named(&self, name: &str) -> Option<&NamedScope> {
        self.named.get(name)
    }

    pub fn create_named(&mut self, name: &str, prefix: &str, defined_at: &LineId) -> Result<()> {
        let fail = |msg: String| AsmError::Scope {
            line: defined_at.clone(),
            msg,
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(fail(format!("scope name `{name}` cannot contain whitespace")));
        }
        if prefix.is_empty() || prefix.contains(char::is_whitespace) {
            return Err(fail(format!(
                "scope prefix `{prefix}` cannot contain whitespace"
            )));
        }
        if prefix.starts_with('.') {
            return Err(fail(format!(
                "scope prefix `{prefix}` cannot start with `.`"
            )));
        }
        if let Some(existing) = self.named.get(name) {
            if existing.prefix == prefix {
                tracing::warn!(
                    "{defined_at}: scope `{name}` is already defined at {}",
                    existing.defined_at
                );
                return Ok(());
            }
            return Err(fail(format!(
                "scope `{name}` already defined at {} with prefix `{}`",
                existing.defined_at, existing.prefix
            )));
        }
        if let Some(owner) = self.named.values().find(|scope| scope.prefix == prefix) {
            return Err(fail(format!(
                "scope prefix `{prefix}` is already used by scope `{}` defined at {}",
                owner.name, owner.defined_at
            )));
        }
        tracing::debug!("{defined_at}: created scope `{name}` with prefix `{prefix}`");
        self.named.insert(
            name.to_string(),
            NamedScope {
                name: name.to_string(),
                prefix: prefix.to_string(),
                defined_at: defined_at.clone(),
                labels: HashMap::new(),
            },
        );
        Ok(())
    }

    fn check_name(&self, label: &str, line: &LineId) -> Result<()> {
        let invalid = |reason: &str| AsmError::InvalidLabel {
            line: line.clone(),
            label: label.to_string(),
            reason: reason.to_string(),
        };
        if !is_valid_label(label) {
            return Err(invalid("malformed label"));
        }
        if self.registers.contains(label) {
            return Err(invalid("it is a register name"));
        }
        let base = &label[ScopeKind::of(label).prefix().len()..];
        if is_keyword(base) {
            return Err(invalid(&format!("`{base}` is an assembler keyword")));
        }
        Ok(())
    }

    /// Defines `label` as seen from the scope `at`.
    pub fn define(
        &mut self,
        at: ScopeId,
        label: &str,
        value: i64,
        line: &LineId,
        active: &ActiveScopes,
    ) -> Result<()> {
        self.check_name(label, line)?;
        let info = LabelInfo {
            value,
            line: line.clone(),
        };

        for name in active.iter() {
            let Some(scope) = self.named.get_mut(name) else {
                continue;
            };
            if !label.starts_with(&scope.prefix) {
                continue;
            }
            // only the file that created a named scope can add to it
            if scope.defined_at.file != line.file {
                break;
            }
            if let Some(first) = scope.labels.get(label) {
                return Err(AsmError::DuplicateLabel {
                    line: line.clone(),
                    label: label.to_string(),
                    first: first.line.clone(),
                });
            }
            tracing::trace!("{line}: {label} = {value} in scope `{name}`");
            scope.labels.insert(label.to_string(), info);
            return Ok(());
        }

        let kind = ScopeKind::of(label);
        let mut id = at;
        loop {
            let node = &self.nodes[id.0];
            if node.kind == kind {
                break;
            }
            match (node.kind > kind, node.parent) {
                (true, Some(parent)) => id = parent,
                _ => {
                    return Err(AsmError::InvalidLabel {
                        line: line.clone(),
                        label: label.to_string(),
                        reason: "scope is too low for this line".to_string(),
                    })
                }
            }
        }
        let node = &mut self.nodes[id.0];
        if let Some(first) = node.labels.get(label) {
            return Err(AsmError::DuplicateLabel {
                line: line.clone(),
                label: label.to_string(),
                first: first.line.clone(),
            });
        }
        tracing::trace!("{line}: {label} = {value} in {}", node.reference);
        node.labels.insert(label.to_string(), info);
        Ok(())
    }

    /// Finds `label` as seen from the scope `at`. Active named scopes are searched first.
    pub fn lookup(&self, at: ScopeId, label: &str, active: &ActiveScopes) -> Option<i64> {
        for name in active.iter() {
            if let Some(scope) = self.named.get(name) {
                if label.starts_with(&scope.prefix) {
                    return scope.labels.get(label).map(|info| info.value);
                }
            }
        }
        let mut id = Some(at);
        while let Some(current) = id {
            let node = &self.nodes[current.0];
            if let Some(info) = node.labels.get(label) {
                return Some(info.value);
            }
            id = node.parent;
        }
        None
    }

    pub fn view<'a>(&'a self, at: ScopeId, active: &'a ActiveScopes) -> ScopeView<'a> {
        ScopeView {
            scopes: self,
            at,
            active,
        }
    }
}

/// Label lookup from one line's point of view.
#[derive(Clone, Copy)]
pub struct ScopeView<'a> {
    scopes: &'a LabelScopes,
    at: ScopeId,
    active: &'a ActiveScopes,
}

impl Symbols for ScopeView<'_> {
    fn resolve(&self, label: &str, line: &LineId) -> Result<i64> {
        if self.scopes.registers.contains(label) {
            return Err(AsmError::RegisterInExpression {
                line: line.clone(),
                label: label.to_string(),
            });
        }
        self.scopes
            .lookup(self.at, label, self.active)
            .ok_or_else(|| AsmError::UndefinedLabel {
                line: line.clone(),
                label: label.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes() -> LabelScopes {
        LabelScopes::new(["a".to_string(), "hl".to_string()].into_iter().collect())
    }

    fn line(file: &str, n: usize) -> LineId {
        LineId::new(file, n)
    }

    #[test]
    fn tiers_follow_prefix() {
        let mut scopes = scopes();
        let none = ActiveScopes::new();
        let main = line("main.asm", 1);
        let file = scopes.file_scope(&main.file);
        scopes.define(file, "start", 0x100, &main, &none).unwrap();
        let local = scopes.local_scope(file, "start");
        scopes.define(local, ".loop", 0x104, &main, &none).unwrap();
        scopes.define(local, "_buffer", 0x200, &main, &none).unwrap();

        assert_eq!(scopes.lookup(local, ".loop", &none), Some(0x104));
        assert_eq!(scopes.lookup(local, "_buffer", &none), Some(0x200));
        assert_eq!(scopes.lookup(local, "start", &none), Some(0x100));

        // a new local scope hides the previous locals
        let next = scopes.local_scope(local, "next");
        assert_eq!(scopes.lookup(next, ".loop", &none), None);
        assert_eq!(scopes.lookup(next, "_buffer", &none), Some(0x200));

        // file labels are invisible from other files
        let other = line("other.asm", 1);
        let other_file = scopes.file_scope(&other.file);
        assert_eq!(scopes.lookup(other_file, "_buffer", &none), None);
        assert_eq!(scopes.lookup(other_file, "start", &none), Some(0x100));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut scopes = scopes();
        let none = ActiveScopes::new();
        let global = scopes.global();
        scopes.define(global, "x", 1, &line("a", 1), &none).unwrap();
        let err = scopes.define(global, "x", 2, &line("a", 7), &none).unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { first, .. } if first.line == 1));
    }

    #[test]
    fn bad_names_are_rejected() {
        let mut scopes = scopes();
        let none = ActiveScopes::new();
        let global = scopes.global();
        for label in ["hl", "org", "_byte", ".LSB", "__x", "9x"] {
            assert!(
                matches!(
                    scopes.define(global, label, 0, &line("a", 1), &none),
                    Err(AsmError::InvalidLabel { .. })
                ),
                "{label}"
            );
        }
    }

    #[test]
    fn local_without_enclosing_scope() {
        let mut scopes = scopes();
        let none = ActiveScopes::new();
        let file = scopes.file_scope(&Rc::from("a.asm"));
        let err = scopes.define(file, ".early", 0, &line("a.asm", 1), &none);
        assert!(matches!(err, Err(AsmError::InvalidLabel { reason, .. }) if reason.contains("too low")));
    }

    #[test]
    fn registers_are_not_values() {
        let scopes = scopes();
        let none = ActiveScopes::new();
        let view = scopes.view(scopes.global(), &none);
        assert!(matches!(
            view.resolve("hl", &line("a", 3)),
            Err(AsmError::RegisterInExpression { .. })
        ));
        assert!(matches!(
            view.resolve("nothing", &line("a", 3)),
            Err(AsmError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn named_scopes_take_priority() {
        let mut scopes = scopes();
        let lib = line("lib.asm", 1);
        scopes.create_named("gfx", "gfx_", &lib).unwrap();
        scopes.create_named("snd", "snd_", &lib).unwrap();

        let mut active = ActiveScopes::new();
        active.activate("gfx");
        let file = scopes.file_scope(&lib.file);
        scopes.define(file, "gfx_init", 0x40, &lib, &active).unwrap();
        assert_eq!(scopes.named("gfx").map(|s| s.labels.len()), Some(1));
        assert_eq!(scopes.lookup(scopes.global(), "gfx_init", &active), Some(0x40));

        // not visible once deactivated
        active.deactivate("gfx");
        assert_eq!(scopes.lookup(scopes.global(), "gfx_init", &active), None);

        // another file cannot add to the library's namespace
        active.activate("gfx");
        let user = line("user.asm", 9);
        let user_file = scopes.file_scope(&user.file);
        scopes.define(user_file, "gfx_extra", 1, &user, &active).unwrap();
        assert_eq!(scopes.named("gfx").map(|s| s.labels.len()), Some(1));
        active.deactivate("gfx");
        assert_eq!(scopes.lookup(user_file, "gfx_extra", &active), Some(1));
    }

    #[test]
    fn activation_order() {
        let mut active = ActiveScopes::new();
        active.activate("a");
        active.activate("b");
        active.activate("a");
        assert_eq!(active.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        active.deactivate("b");
        active.deactivate("missing");
        assert_eq!(active.iter().collect::<Vec<_>>(), vec!["a"]);
        active.clear();
        assert_eq!(active.iter().count(), 0);
    }

    #[test]
    fn named_scope_validation() {
        let mut scopes = scopes();
        let at = line("a", 1);
        assert!(scopes.create_named("has space", "p_", &at).is_err());
        assert!(scopes.create_named("n", "p _", &at).is_err());
        assert!(scopes.create_named("n", ".p", &at).is_err());
        scopes.create_named("n", "p_", &at).unwrap();
        // identical redefinition is tolerated
        scopes.create_named("n", "p_", &line("a", 5)).unwrap();
        assert!(scopes.create_named("n", "q_", &at).is_err());
        assert!(scopes.create_named("m", "p_", &at).is_err());
    }
}
