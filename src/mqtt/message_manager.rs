use chrono::NaiveDateTime;
use std::fmt;

const PREVIEW_CHARS: usize = 10;

/// An inbound message seen on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MQTTMessage {
    topic: String,
    content: String,
    timestamp: NaiveDateTime,
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(PREVIEW_CHARS).collect();
        if self.content.chars().count() > PREVIEW_CHARS {
            write!(f, "{} - {}...", self.timestamp, preview)
        } else {
            write!(f, "{} - {}", self.timestamp, preview)
        }
    }
}

impl MQTTMessage {
    pub fn from_topic(topic: String, content: String) -> Self {
        MQTTMessage {
            topic,
            content,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Payloads are not guaranteed to be UTF-8, invalid bytes are replaced.
    pub fn from_publish(publish: &rumqttc::Publish) -> Self {
        Self::from_topic(
            publish.topic.clone(),
            String::from_utf8_lossy(&publish.payload).into_owned(),
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn render(&self) -> String {
        format!("{}: {}\n{}", self.timestamp, self.topic, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    #[test]
    fn short_content_is_not_truncated() {
        let msg = MQTTMessage::from_topic("rescue/pole/relay".into(), "0".into());
        assert!(msg.to_string().ends_with(" - 0"));
    }

    #[test]
    fn long_content_is_previewed() {
        let msg = MQTTMessage::from_topic("t".into(), "abcdefghijklmnop".into());
        assert!(msg.to_string().ends_with(" - abcdefghij..."));
    }

    #[test]
    fn publish_with_invalid_utf8_is_lossy() {
        let publish = rumqttc::Publish::new("rescue/pole/relay", QoS::AtMostOnce, vec![0x31, 0xff]);
        let msg = MQTTMessage::from_publish(&publish);
        assert_eq!(msg.topic(), "rescue/pole/relay");
        assert!(msg.content().starts_with('1'));
        assert!(msg.render().contains("rescue/pole/relay"));
    }
}
