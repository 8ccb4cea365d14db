//! Screens and the constrained cursor.
//!
//! The cursor moves in a virtual plane tiled by screens. Each screen routes output to one
//! downstream host, the pointer position is re-projected to the 0..32768 range of the active
//! screen.

use crate::NSCREENS;

/// Screen id used while the cursor is outside of every screen
pub const OFFSCREEN: i8 = -1;

/// Output range of absolute pointer axes
pub const POINTER_RANGE: i64 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Screen {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Cursor units per input count, ×1000
    pub sensitivity: u32,
}

impl Screen {
    pub const fn new(x: u32, y: u32, w: u32, h: u32, sensitivity: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            sensitivity,
        }
    }

    /// Half open containment: the left and top edges belong to the screen, the right and bottom don't
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64 && x < self.x as i64 + self.w as i64 && y >= self.y as i64 && y < self.y as i64 + self.h as i64
    }

    pub fn center(&self) -> (i64, i64) {
        (self.x as i64 + self.w as i64 / 2, self.y as i64 + self.h as i64 / 2)
    }
}

/// Where the cursor is allowed to go
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConstraintMode {
    /// Inside of some screen
    #[default]
    Visible = 0,
    /// Inside of the bounding box of all screens
    BoundingBox = 1,
    /// Anywhere
    NoConstraint = 2,
}

impl ConstraintMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Visible),
            1 => Some(Self::BoundingBox),
            2 => Some(Self::NoConstraint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScreenTable {
    pub screens: [Screen; NSCREENS],
    /// Sensitivity used while no screen contains the cursor
    pub offscreen_sensitivity: u32,
}

impl Default for ScreenTable {
    fn default() -> Self {
        Self {
            screens: [
                Screen::new(0, 0, 16_000_000, 9_000_000, 4000),
                Screen::new(16_000_000, 0, 16_000_000, 9_000_000, 4000),
            ],
            offscreen_sensitivity: 4000,
        }
    }
}

impl ScreenTable {
    pub fn get(&self, id: i8) -> Option<&Screen> {
        if id < 0 {
            return None;
        }
        self.screens.get(id as usize)
    }

    pub fn sensitivity(&self, id: i8) -> u32 {
        self.get(id).map(|s| s.sensitivity).unwrap_or(self.offscreen_sensitivity)
    }

    /// Id of the first screen that contains the point
    pub fn screen_at(&self, x: i64, y: i64) -> Option<i8> {
        self.screens.iter().position(|s| s.contains(x, y)).map(|i| i as i8)
    }

    /// Replace a screen, `OFFSCREEN` only updates the offscreen sensitivity
    pub fn set(&mut self, id: i8, screen: Screen) -> bool {
        if id == OFFSCREEN {
            self.offscreen_sensitivity = screen.sensitivity;
            return true;
        }
        match self.screens.get_mut(id as usize) {
            Some(slot) if id >= 0 => {
                *slot = screen;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Bounds {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

/// The cursor, in the coordinates of the screen plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub x: i64,
    pub y: i64,
    pub active_screen: i8,
    bounds: Bounds,
}

impl Cursor {
    pub fn new(screens: &ScreenTable) -> Self {
        let mut cursor = Self {
            x: 0,
            y: 0,
            active_screen: 0,
            bounds: Bounds::default(),
        };
        cursor.screens_updated(screens);
        cursor
    }

    /// Recompute the bounding box and move the cursor to the center of screen 0
    pub fn screens_updated(&mut self, screens: &ScreenTable) {
        let mut bounds = Bounds {
            min_x: i64::MAX,
            min_y: i64::MAX,
            max_x: i64::MIN,
            max_y: i64::MIN,
        };
        for s in screens.screens.iter() {
            bounds.min_x = bounds.min_x.min(s.x as i64);
            bounds.min_y = bounds.min_y.min(s.y as i64);
            bounds.max_x = bounds.max_x.max(s.x as i64 + s.w as i64);
            bounds.max_y = bounds.max_y.max(s.y as i64 + s.h as i64);
        }
        self.bounds = bounds;
        self.recenter(screens, 0);
    }

    /// Put the cursor in the middle of the given screen and make it active
    pub fn recenter(&mut self, screens: &ScreenTable, id: i8) {
        if let Some(screen) = screens.get(id) {
            (self.x, self.y) = screen.center();
            self.active_screen = id;
        }
    }

    /// Advance to the next screen, wrapping around
    pub fn next_screen(&mut self, screens: &ScreenTable) {
        let next = ((self.active_screen as i32 + 1).rem_euclid(NSCREENS as i32)) as i8;
        self.recenter(screens, next);
    }

    /// Check whether the point is acceptable under `mode`, updating the active screen when it is.
    pub fn within_bounds(&mut self, x: i64, y: i64, mode: ConstraintMode, screens: &ScreenTable) -> bool {
        if let Some(id) = screens.screen_at(x, y) {
            self.active_screen = id;
            return true;
        }
        let accepted = match mode {
            ConstraintMode::Visible => false,
            ConstraintMode::BoundingBox => {
                x >= self.bounds.min_x && x < self.bounds.max_x && y >= self.bounds.min_y && y < self.bounds.max_y
            }
            ConstraintMode::NoConstraint => true,
        };
        if accepted {
            self.active_screen = OFFSCREEN;
        }
        accepted
    }

    /// Move the cursor by ×1000 input counts, draining what was consumed from the accumulators.
    ///
    /// When the diagonal move isn't accepted, the vertical and then the horizontal component are
    /// tried alone, so the cursor slides along screen edges.
    pub fn apply_motion(&mut self, acc_x: &mut i32, acc_y: &mut i32, mode: ConstraintMode, screens: &ScreenTable) {
        let sensitivity = screens.sensitivity(self.active_screen) as i64;
        let dx = drain(acc_x, sensitivity);
        let dy = drain(acc_y, sensitivity);
        let (new_x, new_y) = (self.x + dx, self.y + dy);

        if self.within_bounds(new_x, new_y, mode, screens) {
            self.x = new_x;
            self.y = new_y;
        } else if self.within_bounds(self.x, new_y, mode, screens) {
            self.y = new_y;
        } else if self.within_bounds(new_x, self.y, mode, screens) {
            self.x = new_x;
        }
    }

    /// Position inside of the active screen, scaled to `0..POINTER_RANGE`
    pub fn local_position(&self, screens: &ScreenTable) -> Option<(i32, i32)> {
        let screen = screens.get(self.active_screen)?;
        let scale = |pos: i64, origin: u32, size: u32| -> i32 {
            if size == 0 {
                return 0;
            }
            ((pos - origin as i64) * POINTER_RANGE / size as i64) as i32
        };
        Some((scale(self.x, screen.x, screen.w), scale(self.y, screen.y, screen.h)))
    }
}

/// Convert a ×1000 accumulator into cursor units, leaving the unconsumed remainder in it
fn drain(acc: &mut i32, sensitivity: i64) -> i64 {
    let delta = *acc as i64 * sensitivity / 1000;
    if sensitivity == 0 {
        *acc = 0;
        return 0;
    }
    let consumed = delta * 1000 / sensitivity;
    *acc -= consumed as i32;
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_boundary() {
        let screens = ScreenTable::default();
        let mut cursor = Cursor::new(&screens);
        assert_eq!(cursor.active_screen, 0);
        assert_eq!((cursor.x, cursor.y), (8_000_000, 4_500_000));

        // The shared edge belongs to the right screen
        assert!(cursor.within_bounds(16_000_000, 100, ConstraintMode::Visible, &screens));
        assert_eq!(cursor.active_screen, 1);
        assert!(cursor.within_bounds(15_999_999, 100, ConstraintMode::Visible, &screens));
        assert_eq!(cursor.active_screen, 0);
        // The far edges belong to nothing
        assert!(!cursor.within_bounds(32_000_000, 100, ConstraintMode::Visible, &screens));
        assert!(!cursor.within_bounds(100, 9_000_000, ConstraintMode::Visible, &screens));
        assert!(!cursor.within_bounds(-1, 100, ConstraintMode::BoundingBox, &screens));
        assert_eq!(cursor.active_screen, 0);
        assert!(cursor.within_bounds(-1, 100, ConstraintMode::NoConstraint, &screens));
        assert_eq!(cursor.active_screen, OFFSCREEN);
    }

    #[test]
    fn test_bounding_box_gap() {
        let mut screens = ScreenTable::default();
        // Screen 1 is shorter, leaving a gap below it inside the bounding box
        screens.screens[1].h = 4_000_000;
        let mut cursor = Cursor::new(&screens);
        assert!(!cursor.within_bounds(20_000_000, 6_000_000, ConstraintMode::Visible, &screens));
        assert!(cursor.within_bounds(20_000_000, 6_000_000, ConstraintMode::BoundingBox, &screens));
        assert_eq!(cursor.active_screen, OFFSCREEN);
    }

    #[test]
    fn test_slides_along_edge() {
        let screens = ScreenTable::default();
        let mut cursor = Cursor::new(&screens);
        cursor.x = 2;
        cursor.y = 2;
        // 1 count = 4000 units, moving up-left from near the top left corner
        let mut acc_x = -1000;
        let mut acc_y = -1000;
        cursor.apply_motion(&mut acc_x, &mut acc_y, ConstraintMode::Visible, &screens);
        // Neither axis can move
        assert_eq!((cursor.x, cursor.y), (2, 2));

        let mut acc_x = 1000;
        let mut acc_y = -1000;
        cursor.x = 8000;
        cursor.apply_motion(&mut acc_x, &mut acc_y, ConstraintMode::Visible, &screens);
        // Y is blocked, X still moves
        assert_eq!((cursor.x, cursor.y), (12000, 2));
        assert_eq!((acc_x, acc_y), (0, 0));
    }

    #[test]
    fn test_visible_trajectory_stays_inside() {
        let screens = ScreenTable::default();
        let mut cursor = Cursor::new(&screens);
        for step in 0..2000 {
            let mut acc_x = if step % 3 == 0 { -700_000 } else { 900_000 };
            let mut acc_y = if step % 5 == 0 { 600_000 } else { -450_000 };
            cursor.apply_motion(&mut acc_x, &mut acc_y, ConstraintMode::Visible, &screens);
            assert!(screens.screen_at(cursor.x, cursor.y).is_some());
        }
    }

    #[test]
    fn test_fractional_accumulator() {
        let mut screens = ScreenTable::default();
        screens.screens[0].sensitivity = 3;
        let mut cursor = Cursor::new(&screens);
        let start = cursor.x;
        let mut acc_x = 500;
        let mut acc_y = 0;
        cursor.apply_motion(&mut acc_x, &mut acc_y, ConstraintMode::Visible, &screens);
        // 500 * 3 / 1000 = 1 unit, which consumed 333 of the accumulator
        assert_eq!(cursor.x, start + 1);
        assert_eq!(acc_x, 167);
    }

    #[test]
    fn test_local_position() {
        let screens = ScreenTable::default();
        let mut cursor = Cursor::new(&screens);
        assert_eq!(cursor.local_position(&screens), Some((16384, 16384)));
        cursor.next_screen(&screens);
        assert_eq!(cursor.active_screen, 1);
        assert_eq!(cursor.x, 24_000_000);
        cursor.x = 16_000_000;
        assert_eq!(cursor.local_position(&screens).map(|p| p.0), Some(0));
        cursor.next_screen(&screens);
        assert_eq!(cursor.active_screen, 0);
        cursor.active_screen = OFFSCREEN;
        assert_eq!(cursor.local_position(&screens), None);
    }
}
