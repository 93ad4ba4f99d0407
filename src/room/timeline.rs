//! Ordered, de-duplicated message timeline for one room.
//!
//! History is merged once with a stable sort on `sent_at`; live messages are
//! then placed with a sorted insert. The common case (a live message at or
//! after the newest one shown) is a plain push.

use std::collections::HashSet;

use crate::models::{Message, MessageKey};

/// Where an incoming message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Pushed after the newest message.
    AtEnd,
    /// Arrived out of order and was inserted at `index`.
    Inserted { index: usize },
    /// Already present; the timeline is unchanged.
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    seen: HashSet<MessageKey>,
}

impl Timeline {
    /// Merge the two history feeds into the initial timeline.
    ///
    /// Text comes before media in the concatenation, and the sort is stable,
    /// so a text and a media entry with the same timestamp keep that order.
    /// Repeated entries are kept only once (first occurrence wins).
    pub fn build_initial(text: Vec<Message>, media: Vec<Message>) -> Self {
        let mut timeline = Self {
            messages: Vec::with_capacity(text.len() + media.len()),
            seen: HashSet::with_capacity(text.len() + media.len()),
        };

        for msg in text.into_iter().chain(media) {
            if timeline.seen.insert(msg.key()) {
                timeline.messages.push(msg);
            }
        }

        // slice::sort_by is stable
        timeline.messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
        timeline
    }

    /// Place one live message.
    ///
    /// Stamped messages stay in non-decreasing `sent_at` order; unstamped ones
    /// keep the position they arrived at. A message at or after the newest
    /// stamped one (or an unstamped one) is pushed. Older ones are inserted
    /// before the first stamped message that is strictly newer, so ties
    /// resolve by arrival order.
    pub fn append(&mut self, incoming: Message) -> Appended {
        if !self.seen.insert(incoming.key()) {
            return Appended::Duplicate;
        }

        let in_order = incoming.sent_at.is_empty()
            || self
                .last_seen()
                .map_or(true, |newest| newest <= incoming.sent_at.as_str());

        if in_order {
            self.messages.push(incoming);
            return Appended::AtEnd;
        }

        // Not in order, so some stamped message is newer.
        let index = self
            .messages
            .iter()
            .position(|m| !m.sent_at.is_empty() && m.sent_at > incoming.sent_at)
            .unwrap_or(self.messages.len());
        self.messages.insert(index, incoming);
        Appended::Inserted { index }
    }

    /// Merge messages re-fetched after a reconnect. Returns how many were new.
    pub fn merge_replay<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        messages
            .into_iter()
            .map(|msg| self.append(msg))
            .filter(|outcome| *outcome != Appended::Duplicate)
            .count()
    }

    /// Timestamp of the newest stamped message.
    pub fn last_seen(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .map(|m| m.sent_at.as_str())
            .find(|t| !t.is_empty())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, sent_at: &str, body: &str) -> Message {
        Message {
            room_id: "room-1".to_string(),
            sender_id: sender.to_string(),
            sender_name: None,
            body: Some(body.to_string()),
            media_ref: None,
            sent_at: sent_at.to_string(),
        }
    }

    fn media(sender: &str, sent_at: &str, url: &str) -> Message {
        Message {
            room_id: "room-1".to_string(),
            sender_id: sender.to_string(),
            sender_name: None,
            body: None,
            media_ref: Some(url.to_string()),
            sent_at: sent_at.to_string(),
        }
    }

    fn stamps(timeline: &Timeline) -> Vec<&str> {
        timeline.iter().map(|m| m.sent_at.as_str()).collect()
    }

    #[test]
    fn test_build_initial_empty() {
        let timeline = Timeline::build_initial(vec![], vec![]);
        assert!(timeline.is_empty());
        assert_eq!(timeline.last_seen(), None);
    }

    #[test]
    fn test_build_initial_media_before_text() {
        let text = vec![msg("a", "2024-01-01T10:00:00", "hi")];
        let files = vec![media("b", "2024-01-01T09:59:00", "https://host/f.jpg")];

        let timeline = Timeline::build_initial(text, files);

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.as_slice()[0].media(), Some("https://host/f.jpg"));
        assert_eq!(timeline.as_slice()[1].text(), Some("hi"));
    }

    #[test]
    fn test_build_initial_sorted_and_complete() {
        let text = vec![
            msg("a", "2024-01-01T10:03:00", "3"),
            msg("a", "2024-01-01T10:01:00", "1"),
            msg("b", "2024-01-01T10:05:00", "5"),
        ];
        let files = vec![
            media("c", "2024-01-01T10:04:00", "u4"),
            media("c", "2024-01-01T10:00:00", "u0"),
        ];

        let timeline = Timeline::build_initial(text, files);

        assert_eq!(timeline.len(), 5);
        assert!(timeline
            .as_slice()
            .windows(2)
            .all(|w| w[0].sent_at <= w[1].sent_at));
        assert_eq!(timeline.last_seen(), Some("2024-01-01T10:05:00"));
    }

    #[test]
    fn test_build_initial_ties_keep_text_first() {
        let t = "2024-01-01T10:00:00";
        let text = vec![msg("a", t, "caption"), msg("a", t, "second")];
        let files = vec![media("a", t, "u")];

        let timeline = Timeline::build_initial(text, files);

        let bodies: Vec<_> = timeline
            .iter()
            .map(|m| m.text().or(m.media()).unwrap())
            .collect();
        assert_eq!(bodies, vec!["caption", "second", "u"]);
    }

    #[test]
    fn test_build_initial_drops_repeats() {
        let dup = msg("a", "2024-01-01T10:00:00", "same");
        let timeline = Timeline::build_initial(vec![dup.clone(), dup.clone()], vec![dup]);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_append_in_order_grows_by_one() {
        let mut timeline = Timeline::build_initial(
            vec![
                msg("a", "2024-01-01T10:00:00", "1"),
                msg("b", "2024-01-01T10:01:00", "2"),
            ],
            vec![media("c", "2024-01-01T10:02:00", "u")],
        );
        assert_eq!(timeline.len(), 3);

        let incoming = msg("d", "2024-01-01T10:03:00", "live");
        assert_eq!(timeline.append(incoming.clone()), Appended::AtEnd);

        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.last(), Some(&incoming));
    }

    #[test]
    fn test_append_equal_timestamp_goes_last() {
        let mut timeline = Timeline::build_initial(vec![msg("a", "t1", "x")], vec![]);
        assert_eq!(timeline.append(msg("b", "t1", "y")), Appended::AtEnd);
        assert_eq!(timeline.last().and_then(Message::text), Some("y"));
    }

    #[test]
    fn test_append_out_of_order_is_inserted() {
        let mut timeline = Timeline::build_initial(
            vec![
                msg("a", "2024-01-01T10:00:00", "1"),
                msg("a", "2024-01-01T10:02:00", "3"),
            ],
            vec![],
        );

        let late = msg("b", "2024-01-01T10:01:00", "2");
        assert_eq!(timeline.append(late), Appended::Inserted { index: 1 });
        assert_eq!(
            stamps(&timeline),
            vec![
                "2024-01-01T10:00:00",
                "2024-01-01T10:01:00",
                "2024-01-01T10:02:00"
            ]
        );
    }

    #[test]
    fn test_append_out_of_order_ties_by_arrival() {
        let mut timeline = Timeline::build_initial(
            vec![msg("a", "t1", "first"), msg("a", "t3", "last")],
            vec![],
        );
        timeline.append(msg("b", "t1", "second"));
        timeline.append(msg("c", "t1", "third"));

        let bodies: Vec<_> = timeline.iter().filter_map(Message::text).collect();
        assert_eq!(bodies, vec!["first", "second", "third", "last"]);
    }

    #[test]
    fn test_append_unstamped_is_trusted() {
        let mut timeline = Timeline::build_initial(vec![msg("a", "t5", "x")], vec![]);
        assert_eq!(timeline.append(msg("b", "", "no stamp")), Appended::AtEnd);
        assert_eq!(timeline.last_seen(), Some("t5"));
    }

    fn stamped_in_order(timeline: &Timeline) -> bool {
        let stamped: Vec<_> = timeline
            .iter()
            .map(|m| m.sent_at.as_str())
            .filter(|t| !t.is_empty())
            .collect();
        stamped.windows(2).all(|w| w[0] <= w[1])
    }

    #[test]
    fn test_append_after_unstamped_keeps_order() {
        let mut timeline = Timeline::build_initial(vec![msg("a", "t5", "x")], vec![]);
        assert_eq!(timeline.append(msg("b", "", "no stamp")), Appended::AtEnd);

        assert_eq!(
            timeline.append(msg("c", "t3", "late")),
            Appended::Inserted { index: 0 }
        );
        assert_eq!(stamps(&timeline), vec!["t3", "t5", ""]);
        assert!(stamped_in_order(&timeline));

        assert_eq!(timeline.append(msg("d", "t6", "newer")), Appended::AtEnd);
        assert_eq!(
            timeline.append(msg("e", "t5", "tie")),
            Appended::Inserted { index: 3 }
        );
        assert_eq!(stamps(&timeline), vec!["t3", "t5", "", "t5", "t6"]);
        assert!(stamped_in_order(&timeline));
    }

    #[test]
    fn test_append_duplicate_is_rejected() {
        let mut timeline = Timeline::default();
        let m = msg("a", "t1", "x");
        assert_eq!(timeline.append(m.clone()), Appended::AtEnd);
        assert_eq!(timeline.append(m), Appended::Duplicate);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_merge_replay_counts_only_new() {
        let mut timeline =
            Timeline::build_initial(vec![msg("a", "t1", "x"), msg("a", "t2", "y")], vec![]);

        let inserted = timeline.merge_replay(vec![
            msg("a", "t2", "y"),
            msg("b", "t3", "missed"),
            msg("b", "t4", "also missed"),
        ]);

        assert_eq!(inserted, 2);
        assert_eq!(stamps(&timeline), vec!["t1", "t2", "t3", "t4"]);
    }
}
