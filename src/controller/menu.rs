//! Manual-mode settings menu.
//!
//! A fixed ring of pages, each a variant of [`MenuPage`] with its own
//! adjustment handler. Short press walks the ring, select press enters or
//! leaves a page's edit sub-state, and while editing short presses feed the
//! page's handler instead of navigating.

use super::Settings;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPage {
    /// Read-only overview; select does nothing here.
    Status,
    TargetTemp,
    ShotsPerSession,
    CountdownDuration,
}

impl MenuPage {
    pub fn next(self) -> Self {
        match self {
            MenuPage::Status => MenuPage::TargetTemp,
            MenuPage::TargetTemp => MenuPage::ShotsPerSession,
            MenuPage::ShotsPerSession => MenuPage::CountdownDuration,
            MenuPage::CountdownDuration => MenuPage::Status,
        }
    }

    pub fn editable(self) -> bool {
        !matches!(self, MenuPage::Status)
    }

    pub fn label(self) -> &'static str {
        match self {
            MenuPage::Status => "Status",
            MenuPage::TargetTemp => "Target temp",
            MenuPage::ShotsPerSession => "Shots/session",
            MenuPage::CountdownDuration => "Scan interval",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MenuState {
    page: MenuPage,
    editing: bool,
}

impl Default for MenuState {
    fn default() -> Self {
        Self {
            page: MenuPage::Status,
            editing: false,
        }
    }
}

impl MenuState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> MenuPage {
        self.page
    }

    pub fn editing(&self) -> bool {
        self.editing
    }

    /// Short press: next page, or adjust the current page while editing.
    pub fn on_short(&mut self, settings: &mut Settings) {
        if self.editing {
            adjust(self.page, settings);
        } else {
            self.page = self.page.next();
        }
    }

    /// Select press: toggle the edit sub-state on editable pages.
    pub fn on_select(&mut self) {
        if self.page.editable() {
            self.editing = !self.editing;
        }
    }

    /// Mode switches drop back to the root page.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn adjust(page: MenuPage, settings: &mut Settings) {
    match page {
        MenuPage::Status => {}
        MenuPage::TargetTemp => settings.bump_target_temp(),
        MenuPage::ShotsPerSession => adjust_shots(settings),
        MenuPage::CountdownDuration => adjust_countdown(settings),
    }
}

fn adjust_shots(settings: &mut Settings) {
    settings.shots_per_session = match settings.shots_per_session {
        4 => 8,
        8 => 12,
        12 => 16,
        _ => 4,
    };
}

fn adjust_countdown(settings: &mut Settings) {
    let next = match settings.countdown.as_secs() {
        60 => 300,
        300 => 600,
        600 => 1800,
        _ => 60,
    };
    settings.countdown = Duration::from_secs(next);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_press_walks_the_full_ring() {
        let mut settings = Settings::default();
        let mut menu = MenuState::new();

        let start = menu.page();
        let mut seen = vec![start];
        for _ in 0..3 {
            menu.on_short(&mut settings);
            seen.push(menu.page());
        }
        menu.on_short(&mut settings);
        assert_eq!(menu.page(), start, "ring must wrap around");
        seen.sort_by_key(|p| p.label());
        seen.dedup();
        assert_eq!(seen.len(), 4, "every page is reachable");
    }

    #[test]
    fn select_only_edits_editable_pages() {
        let mut menu = MenuState::new();
        assert_eq!(menu.page(), MenuPage::Status);
        menu.on_select();
        assert!(!menu.editing());

        let mut settings = Settings::default();
        menu.on_short(&mut settings);
        menu.on_select();
        assert!(menu.editing());
        menu.on_select();
        assert!(!menu.editing());
    }

    #[test]
    fn editing_adjusts_instead_of_navigating() {
        let mut settings = Settings::default();
        let mut menu = MenuState::new();
        menu.on_short(&mut settings); // TargetTemp
        menu.on_select();

        let before = settings.target_temp;
        menu.on_short(&mut settings);
        assert_eq!(menu.page(), MenuPage::TargetTemp);
        assert_eq!(settings.target_temp, before + 0.5);
    }

    #[test]
    fn target_temp_edits_share_the_wrap_with_scan_pause() {
        let mut settings = Settings::default();
        settings.target_temp = Settings::TARGET_TEMP_MAX;
        let mut menu = MenuState::new();
        menu.on_short(&mut settings); // TargetTemp
        menu.on_select();
        menu.on_short(&mut settings);
        assert_eq!(settings.target_temp, Settings::TARGET_TEMP_MIN);
    }

    #[test]
    fn shots_cycle_through_the_fixed_choices() {
        let mut settings = Settings::default();
        assert_eq!(settings.shots_per_session, 8);
        adjust_shots(&mut settings);
        assert_eq!(settings.shots_per_session, 12);
        adjust_shots(&mut settings);
        adjust_shots(&mut settings);
        assert_eq!(settings.shots_per_session, 4);
    }
}
