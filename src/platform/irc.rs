use std::collections::HashMap;

/// One parsed IRC line.
///
/// Twitch lines look like:
/// `@badge-info=;color=#1E90FF :bob!bob@bob.tmi.twitch.tv PRIVMSG #ninja :hello there`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a single line without its `\r\n` terminator.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, remainder) = stripped.split_once(' ')?;
            tags = parse_tags(raw);
            rest = remainder.trim_start();
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, remainder) = stripped.split_once(' ')?;
            prefix = Some(raw.to_string());
            rest = remainder.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_string();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nick portion of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag(value)),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Body of a CTCP `ACTION` (`/me`) message, if this is one.
pub fn ctcp_action(text: &str) -> Option<&str> {
    text.strip_prefix("\u{1}ACTION ")
        .map(|body| body.strip_suffix('\u{1}').unwrap_or(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg_with_tags() {
        let line = "@badge-info=;display-name=Bob;emotes= :bob!bob@bob.tmi.twitch.tv PRIVMSG #ninja :hello there";
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.nick(), Some("bob"));
        assert_eq!(msg.param(0), Some("#ninja"));
        assert_eq!(msg.trailing(), Some("hello there"));
        assert_eq!(msg.tag("display-name"), Some("Bob"));
        assert_eq!(msg.tag("emotes"), Some(""));
    }

    #[test]
    fn test_parse_ping() {
        let msg = IrcMessage::parse("PING :tmi.twitch.tv\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn test_parse_numeric_reply() {
        let msg = IrcMessage::parse(":tmi.twitch.tv 001 alice :Welcome, GLHF!").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.nick(), Some("tmi.twitch.tv"));
        assert_eq!(msg.params, vec!["alice", "Welcome, GLHF!"]);
    }

    #[test]
    fn test_trailing_keeps_colons() {
        let msg = IrcMessage::parse(":a!a@a PRIVMSG #c :see https://x.y :)").unwrap();
        assert_eq!(msg.trailing(), Some("see https://x.y :)"));
    }

    #[test]
    fn test_tag_unescape() {
        let msg = IrcMessage::parse(r"@system-msg=hi\sthere\:\\ok :tmi.twitch.tv USERNOTICE #c").unwrap();
        assert_eq!(
            msg.tags.get("system-msg").map(String::as_str),
            Some(r"hi there;\ok")
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(IrcMessage::parse(""), None);
        assert_eq!(IrcMessage::parse("@only-tags"), None);
    }

    #[test]
    fn test_ctcp_action() {
        assert_eq!(ctcp_action("\u{1}ACTION waves\u{1}"), Some("waves"));
        assert_eq!(ctcp_action("just text"), None);
    }
}
