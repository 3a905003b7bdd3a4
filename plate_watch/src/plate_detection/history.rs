use std::collections::VecDeque;
use std::fmt;

use super::NewPlateEvent;

/// Most recent plates first, oldest dropped once full.
#[derive(Debug, Clone)]
pub struct PlateHistory {
    entries: VecDeque<NewPlateEvent>,
    capacity: usize,
}

impl Default for PlateHistory {
    fn default() -> Self {
        Self::with_capacity(10)
    }
}

impl PlateHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: NewPlateEvent) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &NewPlateEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for PlateHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.entries {
            writeln!(f, "{:<10} {}", event.text, event.time.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_ten_most_recent_newest_first() {
        let mut history = PlateHistory::default();
        for i in 0..13 {
            history.push(NewPlateEvent::new(format!("AB{i}X")));
        }
        let texts: Vec<&str> = history.entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts.len(), 10);
        assert_eq!(texts.first(), Some(&"AB12X"));
        assert_eq!(texts.last(), Some(&"AB3X"));
    }

    #[test]
    fn starts_empty_and_renders_lines() {
        let mut history = PlateHistory::with_capacity(3);
        assert!(history.is_empty());
        history.push(NewPlateEvent::new("AB123XY".into()));
        history.push(NewPlateEvent::new("CD45Z".into()));
        let rendered = history.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CD45Z"));
        assert!(lines[1].starts_with("AB123XY"));
    }
}
