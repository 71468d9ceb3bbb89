//! Navigation actions and the trigger symbols that fire them.

/// What a trigger asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavAction {
    First,
    Previous,
    Next,
    Last,
    Jump,
    Stop,
    Help,
}

/// Trigger symbols in attach order. Do not reorder.
pub const TRIGGER_TABLE: [(&str, NavAction); 7] = [
    ("\u{23ee}", NavAction::First),
    ("\u{25c0}", NavAction::Previous),
    ("\u{25b6}", NavAction::Next),
    ("\u{23ed}", NavAction::Last),
    ("\u{1f522}", NavAction::Jump),
    ("\u{23f9}", NavAction::Stop),
    ("\u{2139}", NavAction::Help),
];

impl NavAction {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        TRIGGER_TABLE
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, action)| *action)
    }

    pub fn symbol(self) -> &'static str {
        TRIGGER_TABLE
            .iter()
            .find(|(_, action)| *action == self)
            .map_or("", |(s, _)| s)
    }

    /// One-line description for the help render.
    pub fn description(self) -> &'static str {
        match self {
            NavAction::First => "Goes to the first page",
            NavAction::Previous => "Goes to the previous page",
            NavAction::Next => "Goes to the next page",
            NavAction::Last => "Goes to the last page",
            NavAction::Jump => "Lets you type a page number to jump to",
            NavAction::Stop => "Stops the pagination session",
            NavAction::Help => "Shows this message",
        }
    }

    /// Triggers to attach for a session with `maximum_pages` pages.
    ///
    /// With only two pages the first/last shortcuts add nothing, so they are
    /// left off. They are still honoured if someone asserts them anyway.
    pub fn attached_for(maximum_pages: usize) -> Vec<NavAction> {
        TRIGGER_TABLE
            .iter()
            .map(|(_, action)| *action)
            .filter(|action| {
                maximum_pages != 2 || !matches!(action, NavAction::First | NavAction::Last)
            })
            .collect()
    }
}
