// Regex heuristics over the latest user message. Each function looks at a
// single message and keeps no cross-message state; they gate the tool-step
// policy in `prepare.rs`.

use once_cell::sync::Lazy;
use regex::Regex;

static RENDER_UI_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\brender_ui\b|\b(render|build|create|make|draw|generate|design|show)\b[\s\S]{0,40}\b(ui|interface|dashboard|chart|graph|visuali[sz]ation|form|widget|card|component)s?\b",
    )
    .unwrap()
});

static EXPLICIT_SEARCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(search (the )?(web|internet|online)|web search|google (it|for|this|search)|look (it |this |that )?up online|find online)\b",
    )
    .unwrap()
});

static RECENCY_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(current|latest|breaking|right now|news|headlines|weather|forecast|stock price|stock market|exchange rate|live score)\b",
    )
    .unwrap()
});

static WORKSPACE_DATA_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(my|our)\s+(tasks?|boards?|projects?|docs?|documents?|notes?|calendar|meetings?|workspaces?|teams?)\b",
    )
    .unwrap()
});

static MARKDOWN_TABLE_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(markdown|md|plain( |-)?text)\b[\s\S]{0,30}\btables?\b|\bas a table\b|\bin (a )?table( form(at)?)?\b|\btabular\b",
    )
    .unwrap()
});

static OTHER_WORKSPACE_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\bworkspace\s+(named|called)\b|\b(another|other|different)\s+workspace\b|\b(in|from|switch to)\s+the\s+\S[^?.!,]{0,40}?\s+workspace\b"#,
    )
    .unwrap()
});

static OWN_WORKSPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(my|our|this|current)\s+workspace\b").unwrap()
});

static MEMBERS_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bteam ?mates?\b|\b(team|workspace)\s+members?\b|\bcolleagues?\b|\bwho('s| is| are)\s+(in|on)\s+(the |this |my |our )?(team|workspace)\b",
    )
    .unwrap()
});

/// Does the message explicitly demand a rendered UI?
pub fn wants_render_ui(message: &str) -> bool {
    RENDER_UI_CUE.is_match(message)
}

/// Does the message want a live web search? Explicit phrasing or
/// recency/external-data cues, suppressed when the message is clearly about
/// in-app workspace data.
pub fn wants_web_search(message: &str) -> bool {
    if WORKSPACE_DATA_CUE.is_match(message) {
        return false;
    }
    EXPLICIT_SEARCH.is_match(message) || RECENCY_CUE.is_match(message)
}

/// Does the message ask for markdown tables instead of visual UI?
pub fn prefers_markdown_tables(message: &str) -> bool {
    MARKDOWN_TABLE_CUE.is_match(message)
}

/// Does the message reference another workspace by name?
pub fn references_other_workspace(message: &str) -> bool {
    if OWN_WORKSPACE.is_match(message) && !OTHER_WORKSPACE_CUE.is_match(message) {
        return false;
    }
    OTHER_WORKSPACE_CUE.is_match(message)
}

/// Does the message ask about teammates?
pub fn asks_about_members(message: &str) -> bool {
    MEMBERS_CUE.is_match(message)
}
