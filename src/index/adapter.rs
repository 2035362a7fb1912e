//! Derived queries over a [`BytecodeIndex`].

use std::{
    collections::HashSet,
    sync::{Arc, OnceLock},
};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    config::EngineConfig,
    index::{
        push_unique, BytecodeIndex, HierarchyCache, InstructionKind, MethodQuery, MethodRef,
    },
    Result,
};

/// UI callbacks that are only reachable through user interaction.
///
/// Call sites inside methods with these names are dropped from call-site searches and from
/// forward trace expansion unless interactive elements are explicitly kept.
pub const INTERACTIVE_CALLBACKS: &[&str] = &[
    "onBackPressed",
    "onClick",
    "onContextClick",
    "onContextItemSelected",
    "onContextMenuClosed",
    "onCreateContextMenu",
    "onDrag",
    "onFocusChange",
    "onHover",
    "onKey",
    "onKeyDown",
    "onKeyUp",
    "onLocalVoiceInteractionStarted",
    "onLocalVoiceInteractionStopped",
    "onLongClick",
    "onMenuItemClick",
    "onMenuItemSelected",
    "onMenuOpened",
    "onNavigateUp",
    "onOptionsItemSelected",
    "onOptionsMenuClosed",
    "onProvideAssistContent",
    "onProvideAssistData",
    "onSearchRequested",
    "onTouch",
    "onTouchEvent",
    "onTrackballEvent",
    "onUserInteraction",
];

/// Returns `true` if `method_name` is an interactive UI callback.
#[must_use]
pub fn is_interactive_callback(method_name: &str) -> bool {
    INTERACTIVE_CALLBACKS.contains(&method_name)
}

/// The web view class whose `loadUrl` hands control to script code.
pub const WEBVIEW_CLASS: &str = "Landroid/webkit/WebView;";
/// Annotation marking methods callable from script code.
pub const JAVASCRIPT_INTERFACE: &str = "Landroid/webkit/JavascriptInterface;";
/// Method registering a script-interface object on a web view.
pub const ADD_JAVASCRIPT_INTERFACE: &str = "addJavascriptInterface";

/// Methods and classes exposed to script code through the web view bridge.
#[derive(Debug, Default)]
struct ScriptInterfaces {
    methods: Vec<MethodRef>,
    classes: HashSet<String>,
}

/// One application's index, enriched with the derived queries the engine needs.
///
/// The adapter owns the per-application [`HierarchyCache`] and applies the interactive
/// callback filter. Create one adapter per application and share it by reference across all
/// templates evaluated against that application.
pub struct IndexAdapter<'a> {
    index: &'a dyn BytecodeIndex,
    hierarchy: HierarchyCache,
    keep_interactive: bool,
    script_interfaces: OnceLock<Arc<ScriptInterfaces>>,
    bridges: DashMap<String, Arc<[MethodRef]>>,
}

impl<'a> IndexAdapter<'a> {
    /// Wraps `index`, taking the interactive callback policy from `config`.
    #[must_use]
    pub fn new(index: &'a dyn BytecodeIndex, config: &EngineConfig) -> Self {
        IndexAdapter {
            index,
            hierarchy: HierarchyCache::new(),
            keep_interactive: config.search.keep_interactive_elements,
            script_interfaces: OnceLock::new(),
            bridges: DashMap::new(),
        }
    }

    /// The wrapped index.
    #[must_use]
    pub fn index(&self) -> &'a dyn BytecodeIndex {
        self.index
    }

    /// The hierarchy cache of this application.
    #[must_use]
    pub fn hierarchy(&self) -> &HierarchyCache {
        &self.hierarchy
    }

    /// Returns `class` followed by all of its transitive subclasses.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn class_and_subclasses(&self, class: &str) -> Result<Vec<String>> {
        let subclasses = self.hierarchy.subclasses(self.index, class)?;
        let mut result = Vec::with_capacity(subclasses.len() + 1);
        result.push(class.to_string());
        result.extend(subclasses.iter().cloned());
        Ok(result)
    }

    /// Returns `true` if `class` is `ancestor` or derives from it.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn is_same_or_subclass(&self, class: &str, ancestor: &str) -> Result<bool> {
        Ok(class == ancestor || self.hierarchy.is_subclass_of(self.index, class, ancestor)?)
    }

    fn keep_caller(&self, method: &MethodRef) -> bool {
        self.keep_interactive || !is_interactive_callback(&method.name)
    }

    /// Returns `true` if a method matching `query` exists in its class or any subclass.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn method_exists(&self, query: &MethodQuery) -> Result<bool> {
        for class in self.class_and_subclasses(&query.class)? {
            if !self.index.find_methods(&query.with_class(&class))?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns `true` if `class` or any of its subclasses exists.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn class_exists(&self, class: &str) -> Result<bool> {
        for candidate in self.class_and_subclasses(class)? {
            if !self.index.find_classes(&candidate)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns `true` if a string literal matching `pattern` exists.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn string_exists(&self, pattern: &str) -> Result<bool> {
        Ok(!self.index.find_strings(pattern)?.is_empty())
    }

    /// Returns the callers of `query`, widened over every subclass of its class, with
    /// interactive callbacks filtered.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn calls_to_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for class in self.class_and_subclasses(&query.class)? {
            for caller in self.index.callers_of_method(&query.with_class(&class))? {
                if self.keep_caller(&caller) && seen.insert(caller.clone()) {
                    result.push(caller);
                }
            }
        }
        Ok(result)
    }

    /// Returns the callers of only the exact class of `query`, with interactive callbacks
    /// filtered.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn direct_calls_to_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        Ok(self
            .index
            .callers_of_method(query)?
            .into_iter()
            .filter(|caller| self.keep_caller(caller))
            .collect())
    }

    /// Returns the methods referencing `class` or any of its subclasses, with interactive
    /// callbacks filtered.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn calls_to_class(&self, class: &str) -> Result<Vec<MethodRef>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for candidate in self.class_and_subclasses(class)? {
            for caller in self.index.callers_of_class(&candidate)? {
                if self.keep_caller(&caller) && seen.insert(caller.clone()) {
                    result.push(caller);
                }
            }
        }
        Ok(result)
    }

    /// Returns the methods loading a string matching `pattern`, with interactive callbacks
    /// filtered.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn calls_to_string(&self, pattern: &str) -> Result<Vec<MethodRef>> {
        Ok(self
            .index
            .callers_of_string(pattern)?
            .into_iter()
            .filter(|caller| self.keep_caller(caller))
            .collect())
    }

    /// Returns the methods invoked by `query`, dropping interactive callbacks.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn calls_from_method(&self, query: &MethodQuery) -> Result<Vec<MethodRef>> {
        Ok(self
            .index
            .callees_of_method(query)?
            .into_iter()
            .filter(|callee| self.keep_caller(callee))
            .collect())
    }

    fn script_interfaces(&self) -> Result<Arc<ScriptInterfaces>> {
        if let Some(found) = self.script_interfaces.get() {
            return Ok(Arc::clone(found));
        }

        let methods = self.index.annotated_methods(JAVASCRIPT_INTERFACE)?;
        let classes = methods.iter().map(|m| m.class.clone()).collect();
        let found = Arc::new(ScriptInterfaces { methods, classes });
        debug!(
            "Found {} script interface methods in {} classes",
            found.methods.len(),
            found.classes.len()
        );

        Ok(Arc::clone(self.script_interfaces.get_or_init(|| found)))
    }

    /// Returns `true` if `method` is exposed to script code.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn is_script_interface(&self, method: &MethodRef) -> Result<bool> {
        Ok(self.script_interfaces()?.methods.contains(method))
    }

    /// Returns `true` if `class` is a web view.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn is_webview(&self, class: &str) -> Result<bool> {
        self.is_same_or_subclass(class, WEBVIEW_CLASS)
    }

    /// Returns the script-interface methods reachable through web views of type `class`.
    ///
    /// Bridges are found at the `addJavascriptInterface` call sites of `class` and its
    /// superclasses: every script-interface class invoked there (typically its constructor)
    /// contributes all of its annotated methods.
    ///
    /// # Errors
    ///
    /// Propagates index errors.
    pub fn bridged_methods(&self, class: &str) -> Result<Arc<[MethodRef]>> {
        if let Some(cached) = self.bridges.get(class) {
            return Ok(Arc::clone(cached.value()));
        }

        let interfaces = self.script_interfaces()?;
        let mut bridged_classes: Vec<String> = Vec::new();
        if !interfaces.classes.is_empty() {
            let mut receivers = vec![class.to_string()];
            receivers.extend(self.hierarchy.superclasses(self.index, class)?.iter().cloned());

            let mut sites = Vec::new();
            for receiver in &receivers {
                let query = MethodQuery::named(receiver.as_str(), ADD_JAVASCRIPT_INTERFACE);
                for site in self.index.callers_of_method(&query)? {
                    push_unique(&mut sites, site);
                }
            }

            for site in sites {
                let Some(body) = self.index.method_body(&site)? else {
                    continue;
                };
                for instruction in &body.instructions {
                    if !matches!(instruction.kind, InstructionKind::Invoke(_)) {
                        continue;
                    }
                    if let Some(target) = instruction.invoked() {
                        if interfaces.classes.contains(&target.class) {
                            push_unique(&mut bridged_classes, target.class.clone());
                        }
                    }
                }
            }
        }

        let bridged: Arc<[MethodRef]> = interfaces
            .methods
            .iter()
            .filter(|method| bridged_classes.contains(&method.class))
            .cloned()
            .collect::<Vec<_>>()
            .into();
        debug!("Web view {} bridges {} methods", class, bridged.len());

        self.bridges.insert(class.to_string(), Arc::clone(&bridged));
        Ok(bridged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Instruction, InvokeKind, MemoryIndex, MethodBody};

    fn sig(s: &str) -> MethodRef {
        MethodRef::parse(s).unwrap()
    }

    #[test]
    fn calls_widen_over_subclasses() {
        let index = MemoryIndex::builder()
            .class("Lcom/b/Base;", None)
            .class("Lcom/b/Sub;", Some("Lcom/b/Base;"))
            .call("Lcom/a/X;->x()V", "Lcom/b/Sub;->run()V")
            .build()
            .unwrap();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());

        let callers = adapter
            .calls_to_method(&MethodQuery::parse("Lcom/b/Base;->run()V"))
            .unwrap();
        assert_eq!(callers, vec![sig("Lcom/a/X;->x()V")]);
        assert!(adapter
            .direct_calls_to_method(&MethodQuery::parse("Lcom/b/Base;->run()V"))
            .unwrap()
            .is_empty());
        assert!(adapter
            .method_exists(&MethodQuery::parse("Lcom/b/Base;->run()V"))
            .unwrap());
    }

    #[test]
    fn interactive_callers_are_filtered() {
        let index = MemoryIndex::builder()
            .call("Lcom/a/Ui;->onClick(Landroid/view/View;)V", "Lcom/b/Net;->send()V")
            .call("Lcom/a/Ui;->onResume()V", "Lcom/b/Net;->send()V")
            .build()
            .unwrap();
        let query = MethodQuery::parse("Lcom/b/Net;->send()V");

        let adapter = IndexAdapter::new(&index, &EngineConfig::default());
        assert_eq!(
            adapter.calls_to_method(&query).unwrap(),
            vec![sig("Lcom/a/Ui;->onResume()V")]
        );

        let mut config = EngineConfig::default();
        config.search.keep_interactive_elements = true;
        let adapter = IndexAdapter::new(&index, &config);
        assert_eq!(adapter.calls_to_method(&query).unwrap().len(), 2);
    }

    #[test]
    fn webview_bridge_discovery() {
        let setup = MethodBody::new(4, 1)
            .with(Instruction::new_instance(0, "Lcom/a/Bridge;"))
            .with(Instruction::invoke(
                InvokeKind::Direct,
                &[0],
                sig("Lcom/a/Bridge;-><init>()V"),
            ))
            .with(Instruction::const_string(1, "app"))
            .with(Instruction::invoke(
                InvokeKind::Virtual,
                &[3, 0, 1],
                sig("Lcom/a/Web;->addJavascriptInterface(Ljava/lang/Object;Ljava/lang/String;)V"),
            ));

        let index = MemoryIndex::builder()
            .class("Lcom/a/Web;", Some(WEBVIEW_CLASS))
            .method_body("Lcom/a/Main;->setup()V", setup)
            .annotate("Lcom/a/Bridge;->leak(Ljava/lang/String;)V", JAVASCRIPT_INTERFACE)
            .annotate("Lcom/a/Other;->unused()V", JAVASCRIPT_INTERFACE)
            .build()
            .unwrap();
        let adapter = IndexAdapter::new(&index, &EngineConfig::default());

        assert!(adapter.is_webview("Lcom/a/Web;").unwrap());
        assert!(!adapter.is_webview("Lcom/a/Main;").unwrap());
        assert!(adapter
            .is_script_interface(&sig("Lcom/a/Bridge;->leak(Ljava/lang/String;)V"))
            .unwrap());

        let bridged = adapter.bridged_methods("Lcom/a/Web;").unwrap();
        assert_eq!(
            &*bridged,
            &[sig("Lcom/a/Bridge;->leak(Ljava/lang/String;)V")]
        );
    }
}
