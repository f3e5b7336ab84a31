//! Node table, node picker, and the add, remove, and edit handlers.

use tracing::info;

use super::{Session, SessionError};
use crate::console::{Console, Key, Screen, Style, StyledLine};
use crate::model::{Node, NodeRole, ValidationError, parse_ipv4, validate_node_name};
use crate::process::CommandRunner;
use crate::prompt::{CheckboxField, InputField, ToggleField};

const PICKER_HINT: &str = "Up/Down to move, Enter to select, Esc to go back";

/// Renders `nodes` as a table, marking `selected` when given.
pub(super) fn node_table(nodes: &[Node], selected: Option<usize>) -> Vec<StyledLine> {
    if nodes.is_empty() {
        return vec![StyledLine::new(Style::Muted, "No nodes configured.")];
    }
    let mut lines = vec![StyledLine::new(
        Style::Info,
        format!("  {:<4}{:<20}{:<17}{:<24}{}", "No", "Name", "IP", "Role", "Etcd"),
    )];
    for (index, node) in nodes.iter().enumerate() {
        let (style, pointer) = if selected == Some(index) {
            (Style::Selected, ">")
        } else {
            (Style::Plain, " ")
        };
        lines.push(StyledLine::new(
            style,
            format!(
                "{pointer} {:<4}{:<20}{:<17}{:<24}{}",
                index + 1,
                node.name,
                node.ip,
                node.role_list(),
                node.consensus_flag()
            ),
        ));
    }
    lines
}

impl<R, C> Session<R, C>
where
    R: CommandRunner + 'static,
    C: Console + 'static,
{
    pub(super) fn add_node(&mut self) -> Result<(), SessionError> {
        let Some(node) = self.ask_node("Add Node", None)? else {
            return Ok(());
        };
        let name = node.name.clone();
        self.store.add_node(node)?;
        info!(node = %name, "node added");
        Ok(())
    }

    /// Removes nodes one at a time until the operator backs out or the
    /// list is empty. The selection steps back after each removal.
    pub(super) fn remove_node(&mut self) -> Result<(), SessionError> {
        self.require_nodes()?;
        let mut selected = 0;
        while let Some(index) = self.pick_node("Remove Node", selected)? {
            if let Some(node) = self.store.remove_node(index)? {
                info!(node = %node.name, "node removed");
            }
            selected = index.saturating_sub(1);
        }
        Ok(())
    }

    /// Edits nodes picked from the table. Every prompt starts from the
    /// node's current value.
    pub(super) fn edit_node(&mut self) -> Result<(), SessionError> {
        self.require_nodes()?;
        let mut selected = 0;
        while let Some(index) = self.pick_node("Edit Node", selected)? {
            selected = index;
            let Some(node) = self.ask_node("Edit Node", Some(index))? else {
                continue;
            };
            let name = node.name.clone();
            self.store.edit_node(index, node)?;
            info!(index, node = %name, "node edited");
        }
        Ok(())
    }

    pub(super) fn require_nodes(&self) -> Result<(), SessionError> {
        if self.store.nodes().is_empty() {
            return Err(SessionError::prerequisite(
                "No nodes are configured. Add a node under Set Nodes first.",
            ));
        }
        Ok(())
    }

    /// Lets the operator pick a row. Returns `None` on Esc or when the list
    /// is empty.
    fn pick_node(&mut self, title: &str, start: usize) -> Result<Option<usize>, SessionError> {
        let count = self.store.nodes().len();
        if count == 0 {
            return Ok(None);
        }
        let last = count - 1;
        let mut selected = start.min(last);
        loop {
            let mut screen = Screen::new();
            screen.push(Style::Title, title);
            screen.blank();
            for row in node_table(self.store.nodes(), Some(selected)) {
                screen.push(row.style, row.text);
            }
            screen.blank();
            screen.push(Style::Muted, PICKER_HINT);
            self.console.render(&screen)?;

            match self.console.read_key()? {
                Key::Up => selected = selected.saturating_sub(1),
                Key::Down => selected = (selected + 1).min(last),
                Key::Enter => return Ok(Some(selected)),
                Key::Esc | Key::Backspace => return Ok(None),
                _ => {}
            }
        }
    }

    /// Prompts name, address, roles, and etcd membership. When `existing`
    /// names a node its values are the defaults and its own name and
    /// address do not count as conflicts.
    fn ask_node(&mut self, title: &str, existing: Option<usize>) -> Result<Option<Node>, SessionError> {
        let current = existing.and_then(|index| self.store.nodes().get(index)).cloned();
        let others: Vec<Node> = self
            .store
            .nodes()
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != existing)
            .map(|(_, node)| node.clone())
            .collect();

        let mut name_field = InputField::new(title, "Node name").validator(|value: &str| {
            validate_node_name(value)?;
            if others.iter().any(|node| node.name == value) {
                return Err(ValidationError::DuplicateName {
                    name: value.to_owned(),
                });
            }
            Ok(())
        });
        if let Some(node) = &current {
            name_field = name_field.default_value(node.name.clone());
        }
        let Some(name) = name_field.ask(&mut self.console)?.value() else {
            return Ok(None);
        };

        let mut ip_field = InputField::new(title, "IP address").validator(|value: &str| {
            let ip = parse_ipv4(value)?;
            if others.iter().any(|node| node.ip == ip) {
                return Err(ValidationError::DuplicateIp { ip });
            }
            Ok(())
        });
        if let Some(node) = &current {
            ip_field = ip_field.default_value(node.ip.to_string());
        }
        let Some(ip_text) = ip_field.ask(&mut self.console)?.value() else {
            return Ok(None);
        };
        let ip = parse_ipv4(&ip_text)?;

        let options = NodeRole::ALL
            .iter()
            .map(|role| role.inventory_group().to_owned())
            .collect();
        let checked = NodeRole::ALL
            .iter()
            .map(|role| current.as_ref().is_some_and(|node| node.has_role(*role)))
            .collect();
        let Some(picked) = CheckboxField::new(title, "Roles", options, checked)
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(None);
        };
        let roles = picked
            .iter()
            .filter_map(|index| NodeRole::ALL.get(*index).copied());

        let initial = current.as_ref().is_none_or(|node| node.consensus);
        let Some(consensus) = ToggleField::new(title, "etcd member", initial)
            .ask(&mut self.console)?
            .value()
        else {
            return Ok(None);
        };

        Ok(Some(Node::new(name, ip, roles, consensus)?))
    }
}
