//! Picking a municipality out of a portal's dropdown.
//!
//! Names are compared after [`normalize_name`]: an exact match wins, otherwise
//! the first option (in dropdown order) whose text contains the wanted name.
//! Placeholder options with an empty value are never chosen.

use crate::sanitize::normalize_name;
use crate::session::SelectOption;

fn selectable(option: &SelectOption) -> bool {
    !option.value.trim().is_empty()
}

/// Single pass over `options`.
pub fn match_option<'a>(options: &'a [SelectOption], wanted: &str) -> Option<&'a SelectOption> {
    let wanted = normalize_name(wanted);
    if wanted.is_empty() {
        return None;
    }

    let mut partial = None;
    for option in options.iter().filter(|o| selectable(o)) {
        let text = normalize_name(&option.text);
        if text == wanted {
            return Some(option);
        }
        if partial.is_none() && text.contains(&wanted) {
            partial = Some(option);
        }
    }
    partial
}

/// Like [`match_option`] for options labelled `NAME - UF`, restricted to the
/// options tagged with `tag`. The label is the `title` attribute when present,
/// the visible text otherwise.
pub fn match_tagged<'a>(
    options: &'a [SelectOption],
    wanted: &str,
    tag: &str,
) -> Option<&'a SelectOption> {
    let wanted = normalize_name(wanted);
    let tag = normalize_name(tag);
    if wanted.is_empty() {
        return None;
    }

    let mut partial = None;
    for option in options.iter().filter(|o| selectable(o)) {
        let label = if option.title.trim().is_empty() {
            normalize_name(&option.text)
        } else {
            normalize_name(&option.title)
        };
        let Some((name, suffix)) = label.rsplit_once('-') else {
            continue;
        };
        if suffix.trim() != tag {
            continue;
        }
        let name = name.trim();
        if name == wanted {
            return Some(option);
        }
        if partial.is_none() && name.contains(&wanted) {
            partial = Some(option);
        }
    }
    partial
}
