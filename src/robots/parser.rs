//! Robots.txt rule parsing and matching
//!
//! Tokenizing is delegated to the robotstxt crate's parser; grouping, agent
//! selection and rule precedence are resolved here so that `allowed` is a pure
//! function of the parsed rules and a normalized URL.

use robotstxt::{parse_robotstxt, RobotsParseHandler};
use url::Url;

/// A single Allow or Disallow line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsRule {
    pub allow: bool,
    pub pattern: String,
}

impl RobotsRule {
    /// Specificity used for precedence: the pattern's length
    fn specificity(&self) -> usize {
        self.pattern.len()
    }
}

/// One `User-agent` group as written in the file
#[derive(Debug, Clone, Default)]
struct RobotsGroup {
    agents: Vec<String>,
    rules: Vec<RobotsRule>,
    crawl_delay: Option<f64>,
}

/// Collects groups while the robotstxt tokenizer walks the file
#[derive(Default)]
struct GroupCollector {
    groups: Vec<RobotsGroup>,
    // A user-agent line directly after rules opens a new group
    collecting_agents: bool,
}

impl GroupCollector {
    fn current(&mut self) -> Option<&mut RobotsGroup> {
        self.groups.last_mut()
    }
}

impl RobotsParseHandler for GroupCollector {
    fn handle_robots_start(&mut self) {}

    fn handle_robots_end(&mut self) {}

    fn handle_user_agent(&mut self, _line_num: u32, user_agent: &str) {
        if !self.collecting_agents || self.groups.is_empty() {
            self.groups.push(RobotsGroup::default());
        }
        self.collecting_agents = true;

        // Only the product token before any '/' version suffix takes part in matching
        let token = user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if let Some(group) = self.current() {
            group.agents.push(token);
        }
    }

    fn handle_allow(&mut self, _line_num: u32, value: &str) {
        self.push_rule(true, value);
    }

    fn handle_disallow(&mut self, _line_num: u32, value: &str) {
        self.push_rule(false, value);
    }

    fn handle_sitemap(&mut self, _line_num: u32, _value: &str) {}

    fn handle_unknown_action(&mut self, _line_num: u32, action: &str, value: &str) {
        if !action.eq_ignore_ascii_case("crawl-delay") {
            return;
        }
        self.collecting_agents = false;
        let delay = value.trim().parse::<f64>().ok().filter(|d| *d >= 0.0);
        if let (Some(delay), Some(group)) = (delay, self.current()) {
            group.crawl_delay = Some(delay);
        }
    }
}

impl GroupCollector {
    fn push_rule(&mut self, allow: bool, value: &str) {
        self.collecting_agents = false;
        let pattern = value.trim();
        // An empty value means "no restriction"
        if pattern.is_empty() {
            return;
        }
        if let Some(group) = self.current() {
            group.rules.push(RobotsRule {
                allow,
                pattern: pattern.to_string(),
            });
        }
    }
}

/// Robots policy that applies to this crawler on one origin
///
/// Lifecycle is one fetch per crawl session; the gate caches it per origin.
#[derive(Debug, Clone, Default)]
pub struct RobotsRuleSet {
    rules: Vec<RobotsRule>,
    crawl_delay: Option<f64>,
}

impl RobotsRuleSet {
    /// Parses robots.txt content and resolves the group for `user_agent`
    ///
    /// Group selection prefers, in order: a group naming the agent exactly
    /// (case-insensitive), a group whose agent token is contained in ours, and
    /// finally the `*` group. Several groups at the winning level are merged.
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt file content
    /// * `user_agent` - Our product token, e.g. `SourceSentinel`
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let mut collector = GroupCollector::default();
        parse_robotstxt(content, &mut collector);

        let agent = user_agent.trim().to_lowercase();
        let exact = |a: &String| *a == agent;
        let partial = |a: &String| a != "*" && !a.is_empty() && agent.contains(a.as_str());
        let wildcard = |a: &String| a == "*";

        let matchers: [&dyn Fn(&String) -> bool; 3] = [&exact, &partial, &wildcard];
        for matcher in matchers {
            let selected: Vec<&RobotsGroup> = collector
                .groups
                .iter()
                .filter(|g| g.agents.iter().any(matcher))
                .collect();
            if selected.is_empty() {
                continue;
            }
            return Self {
                rules: selected
                    .iter()
                    .flat_map(|g| g.rules.iter().cloned())
                    .collect(),
                crawl_delay: selected.iter().find_map(|g| g.crawl_delay),
            };
        }

        Self::allow_all()
    }

    /// A rule set that allows everything, used when robots.txt is absent or unreachable
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns the advisory crawl delay in seconds, if the selected group declares one
    pub fn crawl_delay(&self) -> Option<f64> {
        self.crawl_delay
    }

    /// Checks whether a normalized URL may be fetched
    ///
    /// The most specific (longest) matching rule wins; when an Allow and a
    /// Disallow are equally specific, Allow wins. No matching rule means allowed.
    pub fn allowed(&self, url: &Url) -> bool {
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.allowed_path(&target)
    }

    /// Same as [`allowed`](Self::allowed) for a path with optional query
    pub fn allowed_path(&self, path: &str) -> bool {
        if path == "/robots.txt" {
            return true;
        }

        let mut best: Option<&RobotsRule> = None;
        for rule in self.rules.iter().filter(|r| pattern_matches(&r.pattern, path)) {
            best = match best {
                None => Some(rule),
                Some(current) => {
                    let longer = rule.specificity() > current.specificity();
                    let tie_to_allow =
                        rule.specificity() == current.specificity() && rule.allow && !current.allow;
                    if longer || tie_to_allow {
                        Some(rule)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        best.map_or(true, |rule| rule.allow)
    }
}

/// Matches a robots path pattern against a path
///
/// `*` matches any run of characters and a trailing `$` anchors the end;
/// otherwise the pattern is a prefix match.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let p = pattern.as_bytes();
    let s = path.as_bytes();

    // Positions in `s` reachable after consuming a prefix of `p`
    let mut reachable = vec![false; s.len() + 1];
    reachable[0] = true;
    for &c in p {
        let mut next = vec![false; s.len() + 1];
        if c == b'*' {
            let mut seen = false;
            for i in 0..=s.len() {
                seen |= reachable[i];
                next[i] = seen;
            }
        } else {
            for i in 0..s.len() {
                if reachable[i] && s[i] == c {
                    next[i + 1] = true;
                }
            }
        }
        reachable = next;
        if !reachable.iter().any(|r| *r) {
            return false;
        }
    }

    if anchored {
        reachable[s.len()]
    } else {
        reachable.iter().any(|r| *r)
    }
}
