//! Plugin discovery and lifecycle.
//!
//! A [`PluginHandle`] wraps one entry point and walks it through
//! resolve → init → prepare. A [`PluginRegistry`] holds handles by name and
//! drives them in batches.
//!
//! Handles are shared between a registry and the registries filtered from it,
//! so state changes made through one are visible through all of them. Nothing
//! here locks: handles live behind `Rc` and the registry is not `Send`.

use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    fmt, ptr,
    rc::Rc,
    sync::Arc,
};

use certwright_plugin_sdk::{Capability, Plugin, PluginConfig, PluginError, PluginType};

use crate::entry_point::{EntryPoint, EntryPointSource, LoadError};

/// Outcome of [`PluginHandle::prepare`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PrepareState {
    #[default]
    Pending,
    Ready,
    /// Present on the system but needs different settings. Still available.
    Misconfigured(PluginError),
    /// Not installed or otherwise broken; excluded for the rest of the run.
    Unavailable(PluginError),
}

impl PrepareState {
    fn from_outcome(outcome: &Result<(), PluginError>) -> Self {
        match outcome {
            Ok(()) => Self::Ready,
            Err(err) if err.is_misconfiguration() => Self::Misconfigured(err.clone()),
            Err(err) => Self::Unavailable(err.clone()),
        }
    }

    /// The recorded result, `None` while pending.
    pub fn outcome(&self) -> Option<Result<(), PluginError>> {
        match self {
            Self::Pending => None,
            Self::Ready => Some(Ok(())),
            Self::Misconfigured(err) | Self::Unavailable(err) => Some(Err(err.clone())),
        }
    }

    pub fn problem(&self) -> Option<&PluginError> {
        match self {
            Self::Misconfigured(err) | Self::Unavailable(err) => Some(err),
            Self::Pending | Self::Ready => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Misconfigured(_) => "misconfigured",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Lazily resolved, memoized wrapper around one plugin entry point.
pub struct PluginHandle {
    name: String,
    entry_point: EntryPoint,
    plugin_type: OnceCell<Result<Arc<dyn PluginType>, LoadError>>,
    instance: OnceCell<Arc<dyn Plugin>>,
    config: OnceCell<Arc<PluginConfig>>,
    state: RefCell<PrepareState>,
}

impl PluginHandle {
    pub fn new(entry_point: EntryPoint) -> Self {
        Self {
            name: entry_point.name().to_string(),
            entry_point,
            plugin_type: OnceCell::new(),
            instance: OnceCell::new(),
            config: OnceCell::new(),
            state: RefCell::new(PrepareState::Pending),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    /// Resolves the entry point on first use; the outcome is cached either way.
    pub fn plugin_type(&self) -> Result<&Arc<dyn PluginType>, LoadError> {
        self.plugin_type
            .get_or_init(|| self.entry_point.load())
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn description(&self) -> Result<&str, LoadError> {
        Ok(self.plugin_type()?.description())
    }

    pub fn description_with_name(&self) -> Result<String, LoadError> {
        Ok(format!("{} ({})", self.description()?, self.name))
    }

    /// Long description, or the short one when the type declares none.
    pub fn long_description(&self) -> Result<&str, LoadError> {
        let plugin_type = self.plugin_type()?;
        Ok(plugin_type
            .long_description()
            .unwrap_or_else(|| plugin_type.description()))
    }

    pub fn capabilities(&self) -> &[Capability] {
        match self.plugin_type() {
            Ok(plugin_type) => plugin_type.capabilities(),
            Err(_) => &[],
        }
    }

    /// True when the type declares every capability in `required`.
    pub fn implements(&self, required: &[Capability]) -> bool {
        let declared = self.capabilities();
        required.iter().all(|cap| declared.contains(cap))
    }

    /// Creates the instance on the first call and returns it on every call.
    ///
    /// Only the first caller's `config` is used; later ones are dropped. The
    /// only failure is an entry point that cannot be resolved, which cannot
    /// happen for handles produced by [`PluginRegistry::discover`].
    pub fn init(&self, config: Arc<PluginConfig>) -> Result<Arc<dyn Plugin>, LoadError> {
        if let Some(instance) = self.instance.get() {
            return Ok(Arc::clone(instance));
        }
        let instance = self.plugin_type()?.create(Arc::clone(&config), &self.name);
        let _ = self.config.set(config);
        tracing::debug!(plugin = %self.name, "plugin initialized");
        Ok(Arc::clone(self.instance.get_or_init(|| instance)))
    }

    /// Runs the instance's self-check once and records the outcome.
    ///
    /// Later calls return the recorded outcome without running the check
    /// again.
    ///
    /// # Panics
    ///
    /// Panics if [`Self::init`] has not been called.
    pub fn prepare(&self) -> Result<(), PluginError> {
        let recorded = self.state.borrow().outcome();
        if let Some(outcome) = recorded {
            return outcome;
        }
        let Some(instance) = self.instance.get() else {
            panic!("plugin `{}` prepared before it was initialized", self.name);
        };

        let outcome = instance.prepare();
        let state = PrepareState::from_outcome(&outcome);
        match &state {
            PrepareState::Misconfigured(err) => {
                tracing::warn!(plugin = %self.name, error = %err, "plugin is misconfigured");
            }
            PrepareState::Unavailable(err) => {
                tracing::info!(plugin = %self.name, kind = err.kind(), error = %err, "plugin is unavailable");
            }
            PrepareState::Ready | PrepareState::Pending => {
                tracing::debug!(plugin = %self.name, "plugin prepared");
            }
        }
        metrics::counter!("certwright_plugin_prepare_total", "outcome" => state.label())
            .increment(1);
        *self.state.borrow_mut() = state;
        outcome
    }

    pub fn initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    pub fn prepared(&self) -> bool {
        !matches!(*self.state.borrow(), PrepareState::Pending)
    }

    pub fn misconfigured(&self) -> bool {
        matches!(*self.state.borrow(), PrepareState::Misconfigured(_))
    }

    /// Usable this run. A misconfigured plugin still counts as available.
    pub fn available(&self) -> bool {
        matches!(
            *self.state.borrow(),
            PrepareState::Ready | PrepareState::Misconfigured(_)
        )
    }

    pub fn problem(&self) -> Option<PluginError> {
        self.state.borrow().problem().cloned()
    }

    pub fn state(&self) -> PrepareState {
        self.state.borrow().clone()
    }

    pub fn instance(&self) -> Option<Arc<dyn Plugin>> {
        self.instance.get().cloned()
    }

    /// The configuration captured by the first [`Self::init`].
    pub fn config(&self) -> Option<&Arc<PluginConfig>> {
        self.config.get()
    }

    /// True if `instance` is the very object this handle created.
    pub fn owns(&self, instance: &Arc<dyn Plugin>) -> bool {
        self.instance
            .get()
            .is_some_and(|own| ptr::addr_eq(Arc::as_ptr(own), Arc::as_ptr(instance)))
    }

    fn capabilities_label(&self) -> String {
        match self.plugin_type() {
            Ok(plugin_type) => plugin_type
                .capabilities()
                .iter()
                .map(Capability::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            Err(_) => "unresolved".to_string(),
        }
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginHandle#{} [{}]", self.name, self.capabilities_label())
    }
}

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "* {}", self.name)?;
        match self.description() {
            Ok(description) => writeln!(f, "Description: {description}")?,
            Err(err) => writeln!(f, "Description: <{err}>")?,
        }
        writeln!(f, "Capabilities: {}", self.capabilities_label())?;
        writeln!(f, "Entry point: {}", self.entry_point)?;
        writeln!(f, "Initialized: {}", self.initialized())?;
        write!(f, "Prepared: {}", self.prepared())?;

        let state = self.state.borrow();
        match &*state {
            PrepareState::Pending => {}
            PrepareState::Ready => {
                let info = self.instance.get().map(|p| p.more_info()).unwrap_or_default();
                if !info.is_empty() {
                    write!(f, "\nMore info: {info}")?;
                }
            }
            PrepareState::Misconfigured(err) | PrepareState::Unavailable(err) => {
                write!(f, "\nProblem: {err}")?;
            }
        }
        Ok(())
    }
}

/// Immutable mapping from plugin name to handle.
///
/// Filtering returns a new registry holding the same handles.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Rc<PluginHandle>>,
}

impl PluginRegistry {
    /// Registry keyed by each handle's name. Later duplicates win.
    pub fn from_handles(handles: impl IntoIterator<Item = PluginHandle>) -> Self {
        let plugins = handles
            .into_iter()
            .map(|handle| (handle.name().to_string(), Rc::new(handle)))
            .collect();
        Self { plugins }
    }

    /// Builds a registry from every entry point in `groups`.
    ///
    /// Types are resolved here so capability filtering works before any
    /// `init`. Entries that fail to load are logged and skipped. When two
    /// entries share a name the one discovered last wins.
    pub fn discover<G: AsRef<str>>(source: &dyn EntryPointSource, groups: &[G]) -> Self {
        let mut plugins: HashMap<String, Rc<PluginHandle>> = HashMap::new();
        for group in groups {
            let group = group.as_ref();
            for entry_point in source.entry_points(group) {
                let handle = PluginHandle::new(entry_point);
                if let Err(err) = handle.plugin_type() {
                    tracing::warn!(plugin = handle.name(), group, error = %err, "skipping plugin that failed to load");
                    continue;
                }
                tracing::trace!(plugin = handle.name(), group, entry_point = %handle.entry_point(), "discovered plugin");
                let name = handle.name().to_string();
                if let Some(previous) = plugins.insert(name, Rc::new(handle)) {
                    tracing::warn!(
                        plugin = previous.name(),
                        group,
                        replaced = %previous.entry_point(),
                        "duplicate plugin name; keeping the one discovered last"
                    );
                }
            }
        }
        metrics::counter!("certwright_plugins_discovered_total").increment(plugins.len() as u64);
        tracing::debug!(count = plugins.len(), "plugin discovery finished");
        Self { plugins }
    }

    pub fn get(&self, name: &str) -> Option<&Rc<PluginHandle>> {
        self.plugins.get(name)
    }

    /// Plugin names in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<PluginHandle>> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Initializes every plugin with `config`, in ascending name order.
    ///
    /// A handle that fails to load does not stop the others. Instances come
    /// back in name order; if any handle failed, the first failure by name is
    /// returned after all of them were attempted.
    pub fn init_all(&self, config: &Arc<PluginConfig>) -> Result<Vec<Arc<dyn Plugin>>, LoadError> {
        let mut instances = Vec::with_capacity(self.plugins.len());
        let mut first_error = None;
        for handle in self.sorted() {
            match handle.init(Arc::clone(config)) {
                Ok(instance) => instances.push(instance),
                Err(err) => {
                    tracing::warn!(plugin = handle.name(), error = %err, "plugin failed to initialize");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(instances),
        }
    }

    pub fn filter<P>(&self, mut predicate: P) -> Self
    where
        P: FnMut(&PluginHandle) -> bool,
    {
        let plugins = self
            .plugins
            .iter()
            .filter(|(_, handle)| predicate(handle))
            .map(|(name, handle)| (name.clone(), Rc::clone(handle)))
            .collect();
        Self { plugins }
    }

    pub fn filter_by_capabilities(&self, required: &[Capability]) -> Self {
        self.filter(|handle| handle.implements(required))
    }

    /// Prepares every plugin in ascending name order.
    ///
    /// Plugins may take exclusive resources while preparing. Going through
    /// them in one global order keeps two plugins from each holding what the
    /// other one waits for.
    pub fn prepare_all(&self) -> Vec<(String, Result<(), PluginError>)> {
        let mut names: Vec<&String> = self.plugins.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| (name.clone(), self.plugins[name].prepare()))
            .collect()
    }

    pub fn filter_by_availability(&self) -> Self {
        self.filter(PluginHandle::available)
    }

    /// Maps an instance back to the initialized handle that created it.
    pub fn find_by_instance(&self, instance: &Arc<dyn Plugin>) -> Option<&Rc<PluginHandle>> {
        self.plugins
            .values()
            .find(|handle| handle.initialized() && handle.owns(instance))
    }

    fn sorted(&self) -> Vec<&Rc<PluginHandle>> {
        let mut handles: Vec<_> = self.plugins.values().collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles = self
            .sorted()
            .iter()
            .map(|handle| format!("{handle:?}"))
            .collect::<Vec<_>>();
        write!(f, "PluginRegistry({})", handles.join(", "))
    }
}

impl fmt::Display for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plugins.is_empty() {
            return f.write_str("No plugins");
        }
        let rendered = self
            .sorted()
            .iter()
            .map(|handle| handle.to_string())
            .collect::<Vec<_>>();
        f.write_str(&rendered.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;
    use crate::{
        entry_point::StaticSource,
        plugins::{self, null::Null, standalone::Standalone, webroot::Webroot},
    };
    use certwright_plugin_sdk::DEFAULT_GROUP;

    /// Plugin type whose instances report a fixed prepare outcome and log the
    /// order in which they were prepared.
    struct FakeType {
        description: &'static str,
        long_description: Option<&'static str>,
        capabilities: &'static [Capability],
        outcome: Result<(), PluginError>,
        prepared: Arc<Mutex<Vec<String>>>,
        created: Mutex<Vec<Arc<PluginConfig>>>,
    }

    impl FakeType {
        fn new(outcome: Result<(), PluginError>) -> Self {
            Self {
                description: "Fake",
                long_description: None,
                capabilities: &[Capability::Authenticator],
                outcome,
                prepared: Arc::default(),
                created: Mutex::default(),
            }
        }
    }

    impl PluginType for FakeType {
        fn description(&self) -> &str {
            self.description
        }

        fn long_description(&self) -> Option<&str> {
            self.long_description
        }

        fn capabilities(&self) -> &[Capability] {
            self.capabilities
        }

        fn create(&self, config: Arc<PluginConfig>, name: &str) -> Arc<dyn Plugin> {
            self.created.lock().unwrap().push(config);
            Arc::new(FakePlugin {
                name: name.to_string(),
                outcome: self.outcome.clone(),
                prepared: Arc::clone(&self.prepared),
            })
        }
    }

    struct FakePlugin {
        name: String,
        outcome: Result<(), PluginError>,
        prepared: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for FakePlugin {
        fn prepare(&self) -> Result<(), PluginError> {
            self.prepared.lock().unwrap().push(self.name.clone());
            self.outcome.clone()
        }
    }

    fn handle(name: &str, plugin_type: FakeType) -> PluginHandle {
        PluginHandle::new(EntryPoint::for_type(name, "tests:Fake", Arc::new(plugin_type)))
    }

    fn standalone_handle() -> PluginHandle {
        PluginHandle::new(
            EntryPoint::for_type("sa", plugins::STANDALONE_TARGET, Arc::new(Standalone))
                .with_distribution("certwright"),
        )
    }

    fn config() -> Arc<PluginConfig> {
        Arc::new(PluginConfig::new())
    }

    #[test]
    fn name_is_the_registered_name_without_distribution() {
        let cases = [
            ("ep1", "p1.ep1", "p1"),
            ("ep1", "p2.ep2", "p2"),
            ("ep2", "p2.foo.ep2", "p2"),
            ("ep3", "a.ep3", "p3"),
        ];
        for (name, target, distribution) in cases {
            let ep = EntryPoint::for_type(name, target, Arc::new(Null)).with_distribution(distribution);
            assert_eq!(PluginHandle::new(ep).name(), name);
        }
    }

    #[test]
    fn new_handle_starts_unresolved_and_unprepared() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let handle = PluginHandle::new(EntryPoint::new("sa", plugins::STANDALONE_TARGET, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Standalone) as Arc<dyn PluginType>)
        }));

        assert!(!handle.initialized());
        assert!(!handle.prepared());
        assert!(!handle.misconfigured());
        assert!(!handle.available());
        assert!(handle.problem().is_none());
        assert_eq!(handle.name(), "sa");
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        assert!(handle.description().unwrap().contains("temporary webserver"));
        handle.init(config()).unwrap();
        assert!(handle.implements(&[Capability::Authenticator]));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn description_with_name() {
        let mut fake = FakeType::new(Ok(()));
        fake.description = "Desc";
        assert_eq!(handle("sa", fake).description_with_name().unwrap(), "Desc (sa)");
    }

    #[test]
    fn long_description_prefers_declared_text() {
        let mut fake = FakeType::new(Ok(()));
        fake.long_description = Some("Long desc");
        assert_eq!(handle("sa", fake).long_description().unwrap(), "Long desc");
    }

    #[test]
    fn long_description_falls_back_to_description() {
        let mut fake = FakeType::new(Ok(()));
        fake.description = "Long desc not found";
        assert_eq!(
            handle("sa", fake).long_description().unwrap(),
            "Long desc not found"
        );
    }

    #[test]
    fn unresolvable_entry_point_reports_load_error() {
        let handle = PluginHandle::new(EntryPoint::new("gone", "missing:Type", || {
            Err(LoadError::Failed {
                target: "missing:Type".into(),
                reason: "module not found".into(),
            })
        }));
        assert!(handle.description().is_err());
        assert!(handle.init(config()).is_err());
        assert!(!handle.implements(&[Capability::Authenticator]));
        assert!(!handle.initialized());
        assert_eq!(format!("{handle:?}"), "PluginHandle#gone [unresolved]");
    }

    #[test]
    fn implements_requires_every_capability() {
        let handle = standalone_handle();
        assert!(handle.implements(&[Capability::Authenticator]));
        assert!(!handle.implements(&[Capability::Installer]));
        assert!(!handle.implements(&[Capability::Installer, Capability::Authenticator]));
        assert!(handle.implements(&[]));
    }

    #[test]
    fn init_is_memoized_with_first_config() {
        let fake = Arc::new(FakeType::new(Ok(())));
        let handle = PluginHandle::new(EntryPoint::for_type(
            "sa",
            "tests:Fake",
            Arc::clone(&fake) as Arc<dyn PluginType>,
        ));
        let first = config();
        let second = Arc::new(PluginConfig::new().with_setting("sa", "key", "other"));

        let plugin = handle.init(Arc::clone(&first)).unwrap();
        assert!(handle.initialized());
        assert!(Arc::ptr_eq(&plugin, &handle.init(Arc::clone(&first)).unwrap()));
        assert!(Arc::ptr_eq(&plugin, &handle.init(second).unwrap()));

        let created = fake.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(Arc::ptr_eq(&created[0], &first));
        assert!(Arc::ptr_eq(handle.config().unwrap(), &first));

        assert!(!handle.prepared());
        assert!(!handle.misconfigured());
        assert!(!handle.available());
    }

    #[test]
    fn prepare_success() {
        let handle = handle("sa", FakeType::new(Ok(())));
        handle.init(config()).unwrap();
        assert!(handle.prepare().is_ok());
        assert!(handle.prepared());
        assert!(!handle.misconfigured());
        assert!(handle.available());
        assert!(handle.problem().is_none());
        assert_eq!(handle.state(), PrepareState::Ready);
    }

    #[test]
    fn prepare_misconfigured_stays_available() {
        let err = PluginError::misconfiguration("bad settings");
        let handle = handle("sa", FakeType::new(Err(err.clone())));
        handle.init(config()).unwrap();
        assert_eq!(handle.prepare(), Err(err.clone()));
        assert!(handle.prepared());
        assert!(handle.misconfigured());
        assert!(handle.available());
        assert_eq!(handle.problem(), Some(err));
    }

    #[test]
    fn prepare_no_installation_is_unavailable() {
        let err = PluginError::no_installation("apache2ctl not found");
        let handle = handle("sa", FakeType::new(Err(err.clone())));
        handle.init(config()).unwrap();
        assert_eq!(handle.prepare(), Err(err.clone()));
        assert!(handle.prepared());
        assert!(!handle.misconfigured());
        assert!(!handle.available());
        assert_eq!(handle.problem(), Some(err));
    }

    #[test]
    fn prepare_generic_error_is_unavailable() {
        let err = PluginError::other("boom");
        let handle = handle("sa", FakeType::new(Err(err.clone())));
        handle.init(config()).unwrap();
        assert_eq!(handle.prepare(), Err(err.clone()));
        assert!(handle.prepared());
        assert!(!handle.misconfigured());
        assert!(!handle.available());
        assert_eq!(handle.problem(), Some(err));
    }

    #[test]
    fn prepare_runs_the_check_once() {
        let fake = FakeType::new(Err(PluginError::misconfiguration("x")));
        let log = Arc::clone(&fake.prepared);
        let handle = handle("sa", fake);
        handle.init(config()).unwrap();
        let first = handle.prepare();
        let second = handle.prepare();
        assert_eq!(first, second);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    #[should_panic(expected = "before it was initialized")]
    fn prepare_before_init_panics() {
        let _ = handle("sa", FakeType::new(Ok(()))).prepare();
    }

    #[test]
    fn display_lists_capabilities_and_state() {
        let handle = standalone_handle();
        let output = handle.to_string();
        assert!(output.starts_with("* sa\n"));
        assert!(output.contains("Authenticator"));
        assert!(!output.contains("Installer"));
        assert!(output.contains("Entry point: sa = certwright.plugins.standalone:Authenticator"));
        assert!(output.contains("Initialized: false"));
        assert!(output.contains("Prepared: false"));

        let misconfigured = self::handle("bad", FakeType::new(Err(PluginError::misconfiguration("no path"))));
        misconfigured.init(config()).unwrap();
        let _ = misconfigured.prepare();
        let output = misconfigured.to_string();
        assert!(output.contains("Prepared: true"));
        assert!(output.contains("Problem: misconfiguration: no path"));
    }

    #[test]
    fn debug_is_single_line() {
        assert_eq!(
            format!("{:?}", standalone_handle()),
            "PluginHandle#sa [Authenticator]"
        );
    }

    fn mock_registry() -> (PluginRegistry, Rc<PluginHandle>) {
        let registry = PluginRegistry::from_handles([handle("mock", FakeType::new(Ok(())))]);
        let mock = Rc::clone(registry.get("mock").unwrap());
        (registry, mock)
    }

    /// Entry point whose loader counts how often it runs.
    fn counted(
        name: &str,
        target: &str,
        plugin_type: Arc<dyn PluginType>,
    ) -> (EntryPoint, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let entry_point = EntryPoint::new(name, target, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&plugin_type))
        });
        (entry_point, loads)
    }

    #[test]
    fn discover_resolves_every_group() {
        let (sa, sa_loads) = counted("sa", plugins::STANDALONE_TARGET, Arc::new(Standalone));
        let (wr, wr_loads) = counted("wr", plugins::WEBROOT_TARGET, Arc::new(Webroot));
        let (ep1, ep1_loads) = counted("ep1", plugins::NULL_TARGET, Arc::new(Null));
        let source = StaticSource::new()
            .with("group.one", sa)
            .with("group.two", wr)
            .with("group.two", ep1.with_distribution("p1"));
        let registry = PluginRegistry::discover(&source, &["group.one", "group.two"]);

        // Every type is loaded by discovery itself, before any handle is used.
        for loads in [&sa_loads, &wr_loads, &ep1_loads] {
            assert_eq!(loads.load(Ordering::SeqCst), 1);
        }
        assert!(registry.iter().all(|handle| !handle.initialized()));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("sa").unwrap().entry_point().target(), plugins::STANDALONE_TARGET);
        assert_eq!(registry.get("wr").unwrap().entry_point().target(), plugins::WEBROOT_TARGET);
        assert!(registry.get("ep1").unwrap().implements(&[Capability::Installer]));
        assert!(registry.get("p1:ep1").is_none());
        for loads in [&sa_loads, &wr_loads, &ep1_loads] {
            assert_eq!(loads.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn discover_skips_entries_that_fail_to_load() {
        let source = plugins::builtin_source().with(
            DEFAULT_GROUP,
            EntryPoint::new("broken", "acme.broken:Plugin", || {
                Err(LoadError::UnknownTarget {
                    target: "acme.broken:Plugin".into(),
                })
            }),
        );
        let registry = PluginRegistry::discover(&source, &[DEFAULT_GROUP]);
        let mut names: Vec<_> = registry.names().collect();
        names.sort();
        assert_eq!(names, vec!["null", "standalone", "webroot"]);
    }

    #[test]
    fn discover_keeps_last_entry_on_name_collision() {
        let source = StaticSource::new()
            .with(
                "first",
                EntryPoint::for_type("dup", plugins::NULL_TARGET, Arc::new(Null)),
            )
            .with(
                "second",
                EntryPoint::for_type("dup", plugins::WEBROOT_TARGET, Arc::new(Webroot)),
            );
        let registry = PluginRegistry::discover(&source, &["first", "second"]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().entry_point().target(), plugins::WEBROOT_TARGET);
    }

    #[test]
    fn get_names_and_len() {
        let (registry, mock) = mock_registry();
        assert!(Rc::ptr_eq(registry.get("mock").unwrap(), &mock));
        assert!(registry.get("other").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["mock"]);
        assert_eq!(registry.len(), 1);
        assert_eq!(PluginRegistry::default().len(), 0);
    }

    #[test]
    fn init_all_delegates_to_every_handle() {
        let (registry, mock) = mock_registry();
        let cfg = config();
        let instances = registry.init_all(&cfg).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(mock.owns(&instances[0]));
        assert!(Arc::ptr_eq(mock.config().unwrap(), &cfg));
    }

    fn unloadable(name: &str) -> PluginHandle {
        let target = format!("missing.{name}:Plugin");
        PluginHandle::new(EntryPoint::new(name, target.clone(), move || {
            Err(LoadError::UnknownTarget {
                target: target.clone(),
            })
        }))
    }

    #[test]
    fn init_all_attempts_every_handle_despite_load_failure() {
        for _ in 0..20 {
            let registry = PluginRegistry::from_handles([
                handle("a", FakeType::new(Ok(()))),
                unloadable("b"),
                handle("c", FakeType::new(Ok(()))),
                handle("d", FakeType::new(Ok(()))),
            ]);

            let Err(err) = registry.init_all(&config()) else {
                panic!("init_all must report the unloadable handle");
            };
            assert_eq!(
                err,
                LoadError::UnknownTarget {
                    target: "missing.b:Plugin".into()
                }
            );

            let mut initialized: Vec<_> = registry
                .iter()
                .filter(|handle| handle.initialized())
                .map(|handle| handle.name().to_string())
                .collect();
            initialized.sort();
            assert_eq!(initialized, vec!["a", "c", "d"]);
            assert!(!registry.get("b").unwrap().initialized());
        }
    }

    #[test]
    fn init_all_reports_first_failure_by_name() {
        let registry = PluginRegistry::from_handles([
            unloadable("z"),
            handle("m", FakeType::new(Ok(()))),
            unloadable("k"),
        ]);
        let Err(err) = registry.init_all(&config()) else {
            panic!("init_all must report the unloadable handles");
        };
        assert_eq!(
            err,
            LoadError::UnknownTarget {
                target: "missing.k:Plugin".into()
            }
        );
        assert!(registry.get("m").unwrap().initialized());
    }

    #[test]
    fn init_all_returns_instances_in_name_order() {
        let registry = PluginRegistry::from_handles(
            ["c", "a", "b"].map(|name| handle(name, FakeType::new(Ok(())))),
        );
        let instances = registry.init_all(&config()).unwrap();
        let owners: Vec<_> = instances
            .iter()
            .map(|instance| registry.find_by_instance(instance).unwrap().name())
            .collect();
        assert_eq!(owners, vec!["a", "b", "c"]);
    }

    #[test]
    fn filter_returns_matching_handles() {
        let (registry, mock) = mock_registry();
        let kept = registry.filter(|handle| handle.name().starts_with('m'));
        assert_eq!(kept.len(), 1);
        assert!(Rc::ptr_eq(kept.get("mock").unwrap(), &mock));
        assert!(registry.filter(|handle| handle.name().starts_with('b')).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn filter_by_capabilities() {
        let registry = PluginRegistry::discover(&plugins::builtin_source(), &[DEFAULT_GROUP]);
        let mut authenticators: Vec<_> = registry
            .filter_by_capabilities(&[Capability::Authenticator])
            .names()
            .map(str::to_string)
            .collect();
        authenticators.sort();
        assert_eq!(authenticators, vec!["standalone", "webroot"]);

        let installers = registry.filter_by_capabilities(&[Capability::Installer]);
        assert_eq!(installers.names().collect::<Vec<_>>(), vec!["null"]);
        assert_eq!(registry.filter_by_capabilities(&[]).len(), 3);
        assert!(registry
            .filter_by_capabilities(&[Capability::Authenticator, Capability::Installer])
            .is_empty());
    }

    #[test]
    fn prepare_all_reports_every_outcome() {
        let (registry, mock) = mock_registry();
        registry.init_all(&config()).unwrap();
        assert_eq!(registry.prepare_all(), vec![("mock".to_string(), Ok::<(), PluginError>(()))]);
        assert!(mock.prepared());
    }

    #[test]
    fn prepare_all_runs_in_sorted_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::from_handles(["b", "a", "c"].map(|name| {
            let mut fake = FakeType::new(Ok(()));
            fake.prepared = Arc::clone(&log);
            handle(name, fake)
        }));
        registry.init_all(&config()).unwrap();
        let results = registry.prepare_all();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn prepare_all_order_holds_for_many_plugins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let letters: Vec<String> = ('a'..='z')
            .chain('A'..='Z')
            .rev()
            .map(String::from)
            .collect();
        let registry = PluginRegistry::from_handles(letters.iter().map(|name| {
            let mut fake = FakeType::new(Ok(()));
            fake.prepared = Arc::clone(&log);
            handle(name, fake)
        }));
        registry.init_all(&config()).unwrap();
        registry.prepare_all();

        let mut expected = letters.clone();
        expected.sort();
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[test]
    fn filter_by_availability_leaves_source_untouched() {
        let registry = PluginRegistry::from_handles([
            handle("ok", FakeType::new(Ok(()))),
            handle("misconf", FakeType::new(Err(PluginError::misconfiguration("x")))),
            handle("missing", FakeType::new(Err(PluginError::no_installation("x")))),
            handle("broken", FakeType::new(Err(PluginError::other("x")))),
        ]);
        assert!(registry.filter_by_availability().is_empty());

        registry.init_all(&config()).unwrap();
        let results = registry.prepare_all();
        assert_eq!(results.iter().filter(|(_, outcome)| outcome.is_err()).count(), 3);

        let available = registry.filter_by_availability();
        let mut names: Vec<_> = available.names().collect();
        names.sort();
        assert_eq!(names, vec!["misconf", "ok"]);

        assert_eq!(registry.len(), 4);
        assert!(registry.get("missing").unwrap().prepared());
        assert!(!registry.get("missing").unwrap().available());
        assert!(Rc::ptr_eq(available.get("ok").unwrap(), registry.get("ok").unwrap()));
    }

    #[test]
    fn find_by_instance_uses_identity() {
        let (registry, mock) = mock_registry();
        let stranger = FakeType::new(Ok(())).create(config(), "mock");
        assert!(registry.find_by_instance(&stranger).is_none());

        let instance = mock.init(config()).unwrap();
        let found = registry.find_by_instance(&instance).unwrap();
        assert!(Rc::ptr_eq(found, &mock));
        assert!(registry.find_by_instance(&stranger).is_none());
    }

    #[test]
    fn debug_lists_handles() {
        let (registry, _) = mock_registry();
        assert_eq!(
            format!("{registry:?}"),
            "PluginRegistry(PluginHandle#mock [Authenticator])"
        );
    }

    #[test]
    fn display_joins_handles_by_name() {
        let empty = PluginRegistry::default();
        assert_eq!(empty.to_string(), "No plugins");
        assert!(empty.is_empty());
        assert_eq!(empty.names().count(), 0);

        let registry = PluginRegistry::from_handles([
            handle("mock", FakeType::new(Ok(()))),
            handle("foo", FakeType::new(Ok(()))),
        ]);
        let output = registry.to_string();
        let sections: Vec<_> = output.split("\n\n").collect();
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("* foo"));
        assert!(sections[1].starts_with("* mock"));
    }
}
