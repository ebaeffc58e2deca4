//! Dataset selection toolbar. Presentation only: a selection becomes a
//! [`UiEvent`] that is forwarded unchanged to the session.

use std::fmt::Write as _;

use crate::{
    assets::DatasetRegistry,
    render::RenderContainer,
    session::ViewerSession,
    Result,
};

pub const TOOLBAR_TITLE: &str = "Select BVH Dataset:";
pub const SELECTED_COLOR: &str = "#2e7df6";
pub const IDLE_COLOR: &str = "#2a2a2a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// The user picked the dataset at this path.
    SelectDataset(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolbarButton {
    pub label: String,
    pub path: String,
    pub selected: bool,
    /// Only ever set on the selected button.
    pub loading: bool,
}

impl ToolbarButton {
    pub fn background(&self) -> &'static str {
        if self.selected {
            SELECTED_COLOR
        } else {
            IDLE_COLOR
        }
    }
}

#[derive(Debug, Clone)]
pub struct Toolbar {
    registry: DatasetRegistry,
}

impl Toolbar {
    pub fn new(registry: DatasetRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    /// One button per dataset, in registry order.
    pub fn buttons(&self, selected: Option<&str>, loading: bool) -> Vec<ToolbarButton> {
        self.registry
            .iter()
            .map(|dataset| {
                let is_selected = selected == Some(dataset.path.as_str());
                ToolbarButton {
                    label: dataset.label.clone(),
                    path: dataset.path.clone(),
                    selected: is_selected,
                    loading: is_selected && loading,
                }
            })
            .collect()
    }

    /// Turns a query (1-based index, label or path) into a selection event.
    pub fn select(&self, query: &str) -> Result<UiEvent> {
        let dataset = self.registry.resolve(query)?;
        Ok(UiEvent::SelectDataset(dataset.path.clone()))
    }

    pub fn select_index(&self, index: usize) -> Option<UiEvent> {
        self.registry
            .get(index)
            .map(|dataset| UiEvent::SelectDataset(dataset.path.clone()))
    }

    pub fn render_text(&self, selected: Option<&str>, loading: bool) -> String {
        let mut out = String::from(TOOLBAR_TITLE);
        out.push('\n');
        for (i, button) in self.buttons(selected, loading).iter().enumerate() {
            let marker = if button.selected { '>' } else { ' ' };
            let _ = write!(out, "{marker} [{}] {}", i + 1, button.label);
            if button.loading {
                out.push_str(" (loading...)");
            }
            out.push('\n');
        }
        out
    }

    /// Renders the toolbar for the session's current state.
    pub fn render_for<C: RenderContainer>(&self, session: &ViewerSession<C>) -> String {
        self.render_text(session.selected_dataset(), session.is_loading())
    }
}

/// Hands a toolbar event to the session.
pub fn forward<C: RenderContainer>(session: &mut ViewerSession<C>, event: UiEvent) -> Result<()> {
    match event {
        UiEvent::SelectDataset(path) => session.swap_to(&path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assets::DatasetDescriptor, ViewerError};

    fn toolbar() -> Toolbar {
        Toolbar::new(DatasetRegistry::new(vec![
            DatasetDescriptor::new("Walk", "bvh-data/walk.bvh"),
            DatasetDescriptor::new("Run", "bvh-data/run.bvh"),
        ]))
    }

    #[test]
    fn only_the_selected_button_shows_loading() {
        let buttons = toolbar().buttons(Some("bvh-data/run.bvh"), true);

        assert!(!buttons[0].selected && !buttons[0].loading);
        assert!(buttons[1].selected && buttons[1].loading);
        assert_eq!(buttons[1].background(), SELECTED_COLOR);
        assert_eq!(buttons[0].background(), IDLE_COLOR);
    }

    #[test]
    fn select_resolves_labels_and_indices() {
        let toolbar = toolbar();
        assert_eq!(
            toolbar.select("run").unwrap(),
            UiEvent::SelectDataset("bvh-data/run.bvh".to_string())
        );
        assert_eq!(
            toolbar.select("1").unwrap(),
            UiEvent::SelectDataset("bvh-data/walk.bvh".to_string())
        );
        assert!(matches!(toolbar.select("jump"), Err(ViewerError::UnknownDataset(_))));
        assert!(toolbar.select_index(2).is_none());
    }

    #[test]
    fn text_marks_selection() {
        let text = toolbar().render_text(Some("bvh-data/walk.bvh"), false);
        assert_eq!(text, "Select BVH Dataset:\n> [1] Walk\n  [2] Run\n");
    }
}
