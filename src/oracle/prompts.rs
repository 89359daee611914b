//! Prompt text for the OpenAI-backed oracle.

use crate::traversal::EndEntry;

/// System prompt for an action-selection turn.
///
/// Built with `format!` so user text can never be mistaken for a placeholder.
pub fn decide_prompt(goal: &str, picked: &[String], menu: &[String]) -> String {
    format!(
        "You are a content expert on treatment options. Given the goal query, match it to the \
relevant treatment considerations.

You have access to a knowledge graph in which every node is a treatment consideration.

The goal query is:
<goal>
{goal}
</goal>

These considerations have already been selected:
<end_nodes>
{picked}
</end_nodes>

If the query is not fully covered by the selected considerations, explore further \
using the available tool. Nodes you can expand next:
<nodes>
{menu}
</nodes>

If you are finished finding considerations, reply `done` without calling a tool.",
        goal = goal,
        picked = picked.join("\n"),
        menu = menu.join("\n"),
    )
}

/// Candidates listed under `Category [..]:` headers, in frontier order.
pub fn format_candidates(grouped: &[EndEntry]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<&str> = None;
    for entry in grouped {
        if current != Some(entry.category.as_str()) {
            lines.push(format!("Category [{}]:", entry.category));
            current = Some(entry.category.as_str());
        }
        lines.push(entry.node.clone());
    }
    lines.join("\n")
}

/// System prompt for a set-selection call.
pub fn select_prompt(goal: &str, grouped: &[EndEntry]) -> String {
    format!(
        "Given the following goal query:
<goal>
{goal}
</goal>

Here are some potentially relevant treatment considerations:
<considerations>
{candidates}
</considerations>

Select the considerations that are most relevant to the query; they will be used to guide \
the user to the best treatment. Stick to the list above, copy names exactly, do not invent \
considerations, and do not speculate about what might be relevant.

Return only the list of considerations. Do not return category headers or other text.",
        goal = goal,
        candidates = format_candidates(grouped),
    )
}
