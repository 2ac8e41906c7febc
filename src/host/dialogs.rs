//! Host half of the dialog proxy: one dialog on screen, the rest queued

use std::collections::VecDeque;

use crate::protocol::DialogRequest;

#[derive(Debug, Default)]
pub struct DialogQueue {
    queue: VecDeque<DialogRequest>,
}

impl DialogQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request; returns true when it is the one to show now
    pub fn push(&mut self, request: DialogRequest) -> bool {
        self.queue.push_back(request);
        self.queue.len() == 1
    }

    /// The dialog currently shown
    pub fn front(&self) -> Option<&DialogRequest> {
        self.queue.front()
    }

    /// Take the shown dialog off the queue, revealing the next one
    pub fn answer(&mut self) -> Option<DialogRequest> {
        self.queue.pop_front()
    }

    /// Forget a request the isolated side no longer waits on; returns true
    /// when it was the one shown
    pub fn expire(&mut self, id: &str) -> bool {
        match self.queue.iter().position(|request| request.id == id) {
            Some(index) => {
                self.queue.remove(index);
                index == 0
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DialogType;

    fn request(id: &str) -> DialogRequest {
        DialogRequest {
            id: id.to_string(),
            dialog_type: DialogType::Confirm,
            message: format!("{}?", id),
            default_value: None,
        }
    }

    #[test]
    fn test_shows_in_request_order() {
        let mut queue = DialogQueue::new();
        assert!(queue.push(request("dialog-0")));
        assert!(!queue.push(request("dialog-1")));

        assert_eq!(queue.answer().unwrap().id, "dialog-0");
        assert_eq!(queue.front().unwrap().id, "dialog-1");
        assert_eq!(queue.answer().unwrap().id, "dialog-1");
        assert!(queue.answer().is_none());
    }

    #[test]
    fn test_expire() {
        let mut queue = DialogQueue::new();
        queue.push(request("dialog-0"));
        queue.push(request("dialog-1"));
        queue.push(request("dialog-2"));

        assert!(!queue.expire("dialog-1"));
        assert!(!queue.expire("dialog-9"));
        assert!(queue.expire("dialog-0"));
        assert_eq!(queue.front().unwrap().id, "dialog-2");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut queue = DialogQueue::new();
        queue.push(request("dialog-0"));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.push(request("dialog-1")));
    }
}
