//! Generic container for overlay elements.

use crate::view::ViewState;

/// An overlay element that can be hit-tested in screen space.
pub trait MapElement: Send + Sync {
    /// Screen distance in pixels from `(px, py)` to the element, or `None`
    /// when the point is farther than `tolerance` from it.
    fn hit_distance(&self, view: &ViewState, px: f64, py: f64, tolerance: f64) -> Option<f64>;

    fn is_visible(&self) -> bool {
        true
    }
}

/// Ordered collection of elements of one kind.
///
/// Later elements draw on top of earlier ones. Every mutation bumps the
/// revision so the frame driver can tell when overlays need redrawing.
#[derive(Debug, Clone)]
pub struct ElementManager<T> {
    elements: Vec<T>,
    revision: u64,
}

impl<T> Default for ElementManager<T> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            revision: 0,
        }
    }
}

impl<T> ElementManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element on top and return its index.
    pub fn create(&mut self, element: T) -> usize {
        self.elements.push(element);
        self.revision += 1;
        self.elements.len() - 1
    }

    /// Remove every element matching `predicate`. Returns how many went.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.elements.len();
        self.elements.retain(|e| !predicate(e));
        let removed = before - self.elements.len();
        if removed > 0 {
            self.revision += 1;
        }
        removed
    }

    /// Index of the first element matching `predicate`.
    pub fn index_of<F>(&self, predicate: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.elements.iter().position(predicate)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.elements.get(index)
    }

    /// Mutable access; counts as a change.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        let element = self.elements.get_mut(index)?;
        self.revision += 1;
        Some(element)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.elements.is_empty() {
            self.elements.clear();
            self.revision += 1;
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl<T: MapElement> ElementManager<T> {
    /// Nearest visible element under `(px, py)`; ties go to the topmost.
    pub fn hit_test(
        &self,
        view: &ViewState,
        px: f64,
        py: f64,
        tolerance: f64,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (index, element) in self.elements.iter().enumerate().rev() {
            if !element.is_visible() {
                continue;
            }
            if let Some(distance) = element.hit_distance(view, px, py, tolerance) {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((index, distance));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TilePoint;

    /// Square of half-size `r` centered on a screen point.
    struct Square {
        x: f64,
        y: f64,
        r: f64,
        visible: bool,
    }

    impl MapElement for Square {
        fn hit_distance(&self, _view: &ViewState, px: f64, py: f64, tolerance: f64) -> Option<f64> {
            let d = (px - self.x).abs().max((py - self.y).abs());
            (d <= self.r + tolerance).then_some(d)
        }

        fn is_visible(&self) -> bool {
            self.visible
        }
    }

    fn square(x: f64, y: f64) -> Square {
        Square {
            x,
            y,
            r: 5.0,
            visible: true,
        }
    }

    fn view() -> ViewState {
        ViewState::new(TilePoint::new(1.0, 1.0), 1, 256, 256)
    }

    #[test]
    fn test_create_index_remove() {
        let mut manager = ElementManager::new();
        assert_eq!(manager.create(square(0.0, 0.0)), 0);
        assert_eq!(manager.create(square(10.0, 0.0)), 1);
        assert_eq!(manager.create(square(20.0, 0.0)), 2);

        assert_eq!(manager.index_of(|s| s.x == 10.0), Some(1));
        assert_eq!(manager.index_of(|s| s.x == 99.0), None);

        let rev = manager.revision();
        assert_eq!(manager.remove_where(|s| s.x >= 10.0), 2);
        assert!(manager.revision() > rev);
        assert_eq!(manager.len(), 1);

        let rev = manager.revision();
        assert_eq!(manager.remove_where(|_| false), 0);
        assert_eq!(manager.revision(), rev);
    }

    #[test]
    fn test_hit_test_prefers_nearest_then_topmost() {
        let mut manager = ElementManager::new();
        manager.create(square(100.0, 100.0));
        manager.create(square(103.0, 100.0));
        manager.create(square(100.0, 100.0));

        let (index, distance) = manager.hit_test(&view(), 100.0, 100.0, 0.0).unwrap();
        assert_eq!(index, 2);
        assert_eq!(distance, 0.0);

        assert!(manager.hit_test(&view(), 200.0, 200.0, 2.0).is_none());
    }

    #[test]
    fn test_hidden_elements_are_not_hit() {
        let mut manager = ElementManager::new();
        manager.create(Square {
            visible: false,
            ..square(50.0, 50.0)
        });
        assert!(manager.hit_test(&view(), 50.0, 50.0, 1.0).is_none());
    }
}
