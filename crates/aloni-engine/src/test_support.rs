//! Hand-assembled element tree for unit tests that need exact control over
//! what a query returns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use aloni_surface::{ClickMode, ElementHandle, QuerySpec, Surface, SurfaceError, SurfaceResult};
use async_trait::async_trait;

#[derive(Debug, Clone)]
struct StaticElement {
    selector: String,
    id: String,
    parent: Option<String>,
    text: String,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct StaticState {
    elements: Vec<StaticElement>,
    clicks: Vec<(String, ClickMode)>,
    scrolls: Vec<(Option<String>, i64, i64)>,
    reject_normal_clicks: HashSet<String>,
    reveal_on_click: HashMap<String, Vec<StaticElement>>,
    remove_on_click: HashMap<String, Vec<String>>,
    retext_on_click: HashMap<String, Vec<(String, String)>>,
    reveal_on_query_after_click: HashMap<String, Vec<(String, StaticElement)>>,
    pending_reveals: Vec<(String, StaticElement)>,
    retext_on_query: Vec<(String, String, String)>,
    text_reads: Vec<String>,
}

#[derive(Debug, Default)]
pub struct StaticSurface {
    state: Mutex<StaticState>,
}

fn element(
    selector: &str,
    id: &str,
    parent: Option<&str>,
    text: &str,
    attributes: &[(&str, &str)],
) -> StaticElement {
    StaticElement {
        selector: selector.to_string(),
        id: id.to_string(),
        parent: parent.map(str::to_string),
        text: text.to_string(),
        attributes: attributes
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
    }
}

impl StaticSurface {
    pub fn add(&self, selector: &str, id: &str, text: &str, attributes: &[(&str, &str)]) {
        self.state
            .lock()
            .expect("lock")
            .elements
            .push(element(selector, id, None, text, attributes));
    }

    pub fn add_child(
        &self,
        parent: &str,
        selector: &str,
        id: &str,
        text: &str,
        attributes: &[(&str, &str)],
    ) {
        self.state
            .lock()
            .expect("lock")
            .elements
            .push(element(selector, id, Some(parent), text, attributes));
    }

    pub fn set_text(&self, id: &str, text: &str) {
        let mut state = self.state.lock().expect("lock");
        for element in state.elements.iter_mut().filter(|element| element.id == id) {
            element.text = text.to_string();
        }
    }

    pub fn remove(&self, id: &str) {
        let mut state = self.state.lock().expect("lock");
        state
            .elements
            .retain(|element| element.id != id && element.parent.as_deref() != Some(id));
    }

    pub fn reject_normal_clicks(&self, id: &str) {
        self.state
            .lock()
            .expect("lock")
            .reject_normal_clicks
            .insert(id.to_string());
    }

    pub fn reveal_on_click(&self, clicked: &str, selector: &str, id: &str, text: &str) {
        self.state
            .lock()
            .expect("lock")
            .reveal_on_click
            .entry(clicked.to_string())
            .or_default()
            .push(element(selector, id, None, text, &[]));
    }

    /// After `clicked` is clicked, the element appears on the next query
    /// for `trigger` rather than immediately.
    pub fn reveal_on_query_after_click(
        &self,
        clicked: &str,
        trigger: &str,
        selector: &str,
        id: &str,
        text: &str,
    ) {
        self.state
            .lock()
            .expect("lock")
            .reveal_on_query_after_click
            .entry(clicked.to_string())
            .or_default()
            .push((trigger.to_string(), element(selector, id, None, text, &[])));
    }

    /// The next query for `trigger` changes the text of `id` first.
    pub fn set_text_on_query(&self, trigger: &str, id: &str, text: &str) {
        self.state.lock().expect("lock").retext_on_query.push((
            trigger.to_string(),
            id.to_string(),
            text.to_string(),
        ));
    }

    pub fn remove_on_click(&self, clicked: &str, removed: &str) {
        self.state
            .lock()
            .expect("lock")
            .remove_on_click
            .entry(clicked.to_string())
            .or_default()
            .push(removed.to_string());
    }

    pub fn set_text_on_click(&self, clicked: &str, id: &str, text: &str) {
        self.state
            .lock()
            .expect("lock")
            .retext_on_click
            .entry(clicked.to_string())
            .or_default()
            .push((id.to_string(), text.to_string()));
    }

    pub fn clicks(&self) -> Vec<(String, ClickMode)> {
        self.state.lock().expect("lock").clicks.clone()
    }

    pub fn scrolls(&self) -> Vec<(Option<String>, i64, i64)> {
        self.state.lock().expect("lock").scrolls.clone()
    }

    pub fn text_reads(&self) -> Vec<String> {
        self.state.lock().expect("lock").text_reads.clone()
    }

    fn find(&self, handle: &ElementHandle) -> SurfaceResult<StaticElement> {
        self.state
            .lock()
            .expect("lock")
            .elements
            .iter()
            .find(|element| element.id == handle.id())
            .cloned()
            .ok_or_else(|| SurfaceError::StaleHandle(handle.id().to_string()))
    }
}

fn matches_spec(element: &StaticElement, spec: &QuerySpec) -> bool {
    if element.selector != spec.selector_str() {
        return false;
    }
    match spec {
        QuerySpec::Selector { .. } => true,
        QuerySpec::Attribute { name, value, .. } => {
            element.attributes.get(name).map(String::as_str) == Some(value.as_str())
        }
        QuerySpec::Label {
            attribute, tokens, ..
        } => element.attributes.get(attribute).is_some_and(|label| {
            let label = label.to_lowercase();
            tokens
                .iter()
                .all(|token| label.contains(&token.to_lowercase()))
        }),
        QuerySpec::Text { text, .. } => element.text.to_lowercase().contains(&text.to_lowercase()),
    }
}

#[async_trait]
impl Surface for StaticSurface {
    async fn query(
        &self,
        scope: Option<&ElementHandle>,
        spec: &QuerySpec,
    ) -> SurfaceResult<Vec<ElementHandle>> {
        let mut state = self.state.lock().expect("lock");
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending_reveals)
            .into_iter()
            .partition(|(trigger, _)| trigger == spec.selector_str());
        state.pending_reveals = pending;
        state
            .elements
            .extend(due.into_iter().map(|(_, element)| element));
        let (retexts, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.retext_on_query)
            .into_iter()
            .partition(|(trigger, _, _)| trigger == spec.selector_str());
        state.retext_on_query = waiting;
        for (_, id, text) in retexts {
            for element in state.elements.iter_mut().filter(|element| element.id == id) {
                element.text = text.clone();
            }
        }
        Ok(state
            .elements
            .iter()
            .filter(|element| match scope {
                Some(scope) => element.parent.as_deref() == Some(scope.id()),
                None => true,
            })
            .filter(|element| matches_spec(element, spec))
            .map(|element| ElementHandle::new(element.id.clone()))
            .collect())
    }

    async fn read_text(&self, handle: &ElementHandle) -> SurfaceResult<String> {
        let text = self.find(handle)?.text;
        self.state
            .lock()
            .expect("lock")
            .text_reads
            .push(handle.id().to_string());
        Ok(text)
    }

    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        Ok(self.find(handle)?.attributes.get(name).cloned())
    }

    async fn is_visible(&self, handle: &ElementHandle) -> SurfaceResult<bool> {
        self.find(handle).map(|_| true)
    }

    async fn click(&self, handle: &ElementHandle, mode: ClickMode) -> SurfaceResult<()> {
        self.find(handle)?;
        let mut state = self.state.lock().expect("lock");
        if mode == ClickMode::Normal && state.reject_normal_clicks.contains(handle.id()) {
            return Err(SurfaceError::NotInteractable(handle.id().to_string()));
        }
        state.clicks.push((handle.id().to_string(), mode));
        if let Some(revealed) = state.reveal_on_click.remove(handle.id()) {
            state.elements.extend(revealed);
        }
        if let Some(deferred) = state.reveal_on_query_after_click.remove(handle.id()) {
            state.pending_reveals.extend(deferred);
        }
        if let Some(removed) = state.remove_on_click.remove(handle.id()) {
            state
                .elements
                .retain(|element| !removed.contains(&element.id));
        }
        if let Some(retexts) = state.retext_on_click.remove(handle.id()) {
            for (id, text) in retexts {
                for element in state.elements.iter_mut().filter(|element| element.id == id) {
                    element.text = text.clone();
                }
            }
        }
        Ok(())
    }

    async fn scroll(
        &self,
        container: Option<&ElementHandle>,
        dx: i64,
        dy: i64,
    ) -> SurfaceResult<()> {
        self.state.lock().expect("lock").scrolls.push((
            container.map(|handle| handle.id().to_string()),
            dx,
            dy,
        ));
        Ok(())
    }
}
