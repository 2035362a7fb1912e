//! In-memory [`BytecodeIndex`] implementation.

use std::{collections::HashMap, sync::Arc};

use regex::Regex;

use crate::{
    index::{
        push_unique, BytecodeIndex, FieldRef, InstructionKind, MethodBody, MethodQuery, MethodRef,
        Operand,
    },
    Error, Result,
};

#[derive(Debug)]
struct ClassEntry {
    name: String,
    superclass: Option<String>,
}

#[derive(Debug)]
struct MethodEntry {
    method: MethodRef,
    body: Option<Arc<MethodBody>>,
    callees: Vec<MethodRef>,
    types: Vec<String>,
    strings: Vec<String>,
    reads: Vec<FieldRef>,
    writes: Vec<FieldRef>,
    annotations: Vec<String>,
}

impl MethodEntry {
    fn new(method: MethodRef) -> Self {
        MethodEntry {
            method,
            body: None,
            callees: Vec::new(),
            types: Vec::new(),
            strings: Vec::new(),
            reads: Vec::new(),
            writes: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

/// A [`BytecodeIndex`] held entirely in memory.
///
/// Classes and methods are kept in declaration order, which makes every query result
/// deterministic. Cross references are derived from method bodies (invocations, string and
/// type loads, field accesses) and can be supplemented with explicit edges for methods whose
/// body is not modelled. Every method or class that is only referenced is registered as
/// external: it can be found but has no body and no superclass.
///
/// # Examples
///
/// ```rust
/// use bugscope::index::{BytecodeIndex, MemoryIndex};
///
/// let index = MemoryIndex::builder()
///     .string("Lcom/app/Net;->connect()V", "http://example.com")
///     .build()?;
///
/// assert_eq!(index.find_strings("http://")?, vec!["http://example.com".to_string()]);
/// # Ok::<(), bugscope::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryIndex {
    classes: Vec<ClassEntry>,
    class_lookup: HashMap<String, usize>,
    methods: Vec<MethodEntry>,
    method_lookup: HashMap<MethodRef, usize>,
}

impl MemoryIndex {
    /// Starts building a new index.
    #[must_use]
    pub fn builder() -> MemoryIndexBuilder {
        MemoryIndexBuilder::default()
    }

    /// Number of known classes, including referenced external ones.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of known methods, including referenced external ones.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    fn ensure_class(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.class_lookup.get(name) {
            return idx;
        }
        self.classes.push(ClassEntry {
            name: name.to_string(),
            superclass: None,
        });
        self.class_lookup
            .insert(name.to_string(), self.classes.len() - 1);
        self.classes.len() - 1
    }

    fn ensure_method(&mut self, method: &MethodRef) -> usize {
        if let Some(&idx) = self.method_lookup.get(method) {
            return idx;
        }
        self.ensure_class(&method.class);
        self.methods.push(MethodEntry::new(method.clone()));
        self.method_lookup
            .insert(method.clone(), self.methods.len() - 1);
        self.methods.len() - 1
    }

    fn entry(&self, method: &MethodRef) -> Option<&MethodEntry> {
        self.method_lookup.get(method).map(|&idx| &self.methods[idx])
    }

    fn add_callee(&mut self, caller: usize, callee: &MethodRef) {
        self.ensure_method(callee);
        push_unique(&mut self.methods[caller].callees, callee.clone());
    }

    fn add_body(&mut self, caller: usize, body: MethodBody) {
        for instruction in &body.instructions {
            match instruction.kind {
                InstructionKind::Invoke(_) => {
                    if let Some(target) = instruction.invoked() {
                        let target = target.clone();
                        self.add_callee(caller, &target);
                    }
                }
                InstructionKind::InstanceGet | InstructionKind::StaticGet => {
                    if let Some(field) = instruction.field() {
                        push_unique(&mut self.methods[caller].reads, field.clone());
                    }
                }
                InstructionKind::InstancePut | InstructionKind::StaticPut => {
                    if let Some(field) = instruction.field() {
                        push_unique(&mut self.methods[caller].writes, field.clone());
                    }
                }
                _ => {}
            }

            for operand in &instruction.operands {
                match operand {
                    Operand::String(value) => {
                        push_unique(&mut self.methods[caller].strings, value.clone());
                    }
                    Operand::Type(class) => {
                        self.ensure_class(class);
                        push_unique(&mut self.methods[caller].types, class.clone());
                    }
                    _ => {}
                }
            }
        }
        self.methods[caller].body = Some(Arc::new(body));
    }

    /// Anchors `pattern` at the start; patterns that are not valid regular expressions are
    /// matched as literal prefixes.
    fn compile_pattern(pattern: &str) -> Result<Regex> {
        Regex::new(&format!("^(?:{pattern})"))
            .or_else(|_| Regex::new(&format!("^{}", regex::escape(pattern))))
            .map_err(|e| Error::Index(format!("string pattern {pattern:?} - {e}")))
    }
}

impl BytecodeIndex for MemoryIndex {
    fn subclasses(&self, class: &str) -> Result<Vec<String>> {
        Ok(self
            .classes
            .iter()
            .filter(|entry| entry.superclass.as_deref() == Some(class))
            .map(|entry| entry.name.clone())
            .collect())
    }

    fn superclass(&self, class: &str) -> Result<Option<String>> {
        Ok(self
            .class_lookup
            .get(class)
            .and_then(|&idx| self.classes[idx].superclass.clone()))
    }

    fn find_methods(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| query.matches(&entry.method))
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn find_classes(&self, class: &str) -> Result<Vec<String>> {
        Ok(self
            .class_lookup
            .get(class)
            .map(|&idx| vec![self.classes[idx].name.clone()])
            .unwrap_or_default())
    }

    fn find_strings(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = Self::compile_pattern(pattern)?;
        let mut result = Vec::new();
        for entry in &self.methods {
            for value in &entry.strings {
                if regex.is_match(value) {
                    push_unique(&mut result, value.clone());
                }
            }
        }
        Ok(result)
    }

    fn callers_of_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| entry.callees.iter().any(|callee| query.matches(callee)))
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn callees_of_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        let mut result = Vec::new();
        for entry in self.methods.iter().filter(|e| query.matches(&e.method)) {
            for callee in &entry.callees {
                push_unique(&mut result, callee.clone());
            }
        }
        Ok(result)
    }

    fn callers_of_class(&self, class: &str) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| {
                entry.callees.iter().any(|callee| callee.class == class)
                    || entry.types.iter().any(|t| t == class)
            })
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn callers_of_string(&self, pattern: &str) -> Result<Vec<MethodRef>> {
        let regex = Self::compile_pattern(pattern)?;
        Ok(self
            .methods
            .iter()
            .filter(|entry| entry.strings.iter().any(|value| regex.is_match(value)))
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn method_body(&self, method: &MethodRef) -> Result<Option<Arc<MethodBody>>> {
        Ok(self.entry(method).and_then(|entry| entry.body.clone()))
    }

    fn field_readers(&self, field: &FieldRef) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| entry.reads.contains(field))
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn field_writers(&self, field: &FieldRef) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| entry.writes.contains(field))
            .map(|entry| entry.method.clone())
            .collect())
    }

    fn annotations(&self, method: &MethodRef) -> Result<Vec<String>> {
        Ok(self
            .entry(method)
            .map(|entry| entry.annotations.clone())
            .unwrap_or_default())
    }

    fn annotated_methods(&self, annotation: &str) -> Result<Vec<MethodRef>> {
        Ok(self
            .methods
            .iter()
            .filter(|entry| entry.annotations.iter().any(|a| a == annotation))
            .map(|entry| entry.method.clone())
            .collect())
    }
}

enum Declaration {
    Class(String, Option<String>),
    Method(String),
    Body(String, MethodBody),
    Call(String, String),
    String(String, String),
    Annotation(String, String),
}

/// Builder for [`MemoryIndex`].
///
/// Signatures are passed as strings and validated in [`MemoryIndexBuilder::build`], so a
/// fixture reads like the disassembly it models.
#[derive(Default)]
pub struct MemoryIndexBuilder {
    declarations: Vec<Declaration>,
}

impl MemoryIndexBuilder {
    /// Declares an application class with an optional direct superclass.
    #[must_use]
    pub fn class(mut self, name: &str, superclass: Option<&str>) -> Self {
        self.declarations.push(Declaration::Class(
            name.to_string(),
            superclass.map(str::to_string),
        ));
        self
    }

    /// Declares a method without a body.
    #[must_use]
    pub fn method(mut self, signature: &str) -> Self {
        self.declarations
            .push(Declaration::Method(signature.to_string()));
        self
    }

    /// Declares a method with a decoded body; cross references are derived from it.
    #[must_use]
    pub fn method_body(mut self, signature: &str, body: MethodBody) -> Self {
        self.declarations
            .push(Declaration::Body(signature.to_string(), body));
        self
    }

    /// Adds a call edge without modelling the instruction.
    #[must_use]
    pub fn call(mut self, caller: &str, callee: &str) -> Self {
        self.declarations
            .push(Declaration::Call(caller.to_string(), callee.to_string()));
        self
    }

    /// Records that `method` loads the string literal `value`.
    #[must_use]
    pub fn string(mut self, method: &str, value: &str) -> Self {
        self.declarations
            .push(Declaration::String(method.to_string(), value.to_string()));
        self
    }

    /// Attaches an annotation type to `method`.
    #[must_use]
    pub fn annotate(mut self, method: &str, annotation: &str) -> Self {
        self.declarations.push(Declaration::Annotation(
            method.to_string(),
            annotation.to_string(),
        ));
        self
    }

    /// Builds the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signature`] for the first malformed method signature, or
    /// [`Error::Index`] if a method body is declared twice.
    pub fn build(self) -> Result<MemoryIndex> {
        let mut index = MemoryIndex::default();

        for declaration in self.declarations {
            match declaration {
                Declaration::Class(name, superclass) => {
                    let idx = index.ensure_class(&name);
                    if let Some(parent) = superclass {
                        index.ensure_class(&parent);
                        index.classes[idx].superclass = Some(parent);
                    }
                }
                Declaration::Method(signature) => {
                    index.ensure_method(&MethodRef::parse(&signature)?);
                }
                Declaration::Body(signature, body) => {
                    let method = MethodRef::parse(&signature)?;
                    let idx = index.ensure_method(&method);
                    if index.methods[idx].body.is_some() {
                        return Err(Error::Index(format!("duplicate body for {method}")));
                    }
                    index.add_body(idx, body);
                }
                Declaration::Call(caller, callee) => {
                    let caller = index.ensure_method(&MethodRef::parse(&caller)?);
                    index.add_callee(caller, &MethodRef::parse(&callee)?);
                }
                Declaration::String(method, value) => {
                    let idx = index.ensure_method(&MethodRef::parse(&method)?);
                    push_unique(&mut index.methods[idx].strings, value);
                }
                Declaration::Annotation(method, annotation) => {
                    let idx = index.ensure_method(&MethodRef::parse(&method)?);
                    push_unique(&mut index.methods[idx].annotations, annotation);
                }
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Instruction, InvokeKind};

    fn sig(s: &str) -> MethodRef {
        MethodRef::parse(s).unwrap()
    }

    #[test]
    fn body_derives_cross_references() {
        let field = FieldRef::new("Lcom/a/Store;", "url", "Ljava/lang/String;");
        let body = MethodBody::new(3, 1)
            .with(Instruction::const_string(0, "https://api.example.com"))
            .with(Instruction::iput(0, 2, field.clone()))
            .with(Instruction::new_instance(1, "Lcom/a/Client;"))
            .with(Instruction::invoke(
                InvokeKind::Direct,
                &[1],
                sig("Lcom/a/Client;-><init>()V"),
            ));

        let index = MemoryIndex::builder()
            .method_body("Lcom/a/Main;->setup()V", body)
            .build()
            .unwrap();

        let setup = sig("Lcom/a/Main;->setup()V");
        assert_eq!(index.field_writers(&field).unwrap(), vec![setup.clone()]);
        assert!(index.field_readers(&field).unwrap().is_empty());
        assert_eq!(
            index.callers_of_string("https://").unwrap(),
            vec![setup.clone()]
        );
        assert_eq!(
            index.callers_of_class("Lcom/a/Client;").unwrap(),
            vec![setup.clone()]
        );
        assert_eq!(
            index
                .callees_of_method(&MethodQuery::class("Lcom/a/Main;"))
                .unwrap(),
            vec![sig("Lcom/a/Client;-><init>()V")]
        );
        assert!(index.method_body(&setup).unwrap().is_some());
        assert!(index
            .method_body(&sig("Lcom/a/Client;-><init>()V"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn referenced_members_are_external() {
        let index = MemoryIndex::builder()
            .call("LA;->a()V", "Landroid/webkit/WebView;->loadUrl(Ljava/lang/String;)V")
            .build()
            .unwrap();

        assert_eq!(
            index.find_classes("Landroid/webkit/WebView;").unwrap(),
            vec!["Landroid/webkit/WebView;".to_string()]
        );
        assert_eq!(
            index
                .find_methods(&MethodQuery::named("Landroid/webkit/WebView;", "loadUrl"))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(index.superclass("Landroid/webkit/WebView;").unwrap(), None);
    }

    #[test]
    fn string_patterns_are_anchored() {
        let index = MemoryIndex::builder()
            .string("LA;->a()V", "file:///sdcard/x")
            .string("LA;->b()V", "prefix file://")
            .build()
            .unwrap();

        assert_eq!(index.find_strings("file://").unwrap().len(), 1);
        assert_eq!(index.find_strings(".*file://").unwrap().len(), 2);
        // Not a valid regex, matched literally.
        assert_eq!(index.find_strings("file:///sdcard/x(").unwrap().len(), 0);
    }

    #[test]
    fn duplicate_body_is_rejected() {
        let result = MemoryIndex::builder()
            .method_body("LA;->a()V", MethodBody::new(1, 1))
            .method_body("LA;->a()V", MethodBody::new(1, 1))
            .build();
        assert!(matches!(result, Err(Error::Index(_))));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let result = MemoryIndex::builder().method("LA;").build();
        assert!(matches!(result, Err(Error::Signature(_))));
    }

    #[test]
    fn annotations() {
        let index = MemoryIndex::builder()
            .annotate("LB;->js()V", "Landroid/webkit/JavascriptInterface;")
            .method("LB;->plain()V")
            .build()
            .unwrap();

        assert_eq!(
            index
                .annotated_methods("Landroid/webkit/JavascriptInterface;")
                .unwrap(),
            vec![sig("LB;->js()V")]
        );
        assert!(index.annotations(&sig("LB;->plain()V")).unwrap().is_empty());
    }
}
