use std::fmt;
use std::path::Path;

use super::lexer::{Lexer, Loc, Token, TokenType};
use super::types::{AppConfig, LocationConfig, ServerConfig};
use crate::http::Method;

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>, loc: Option<Loc>) -> Self {
        Self {
            message: message.into(),
            loc,
            context: Vec::new(),
        }
    }

    fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(
                f,
                "\x1b[33mconfig error\x1b[0m at line {}, col {}: {}",
                loc.line, loc.col, self.message
            )?,
            None => write!(f, "\x1b[33mconfig error\x1b[0m: {}", self.message)?,
        }
        for ctx in self.context.iter().rev() {
            write!(f, "\n  \x1b[2min\x1b[0m {}", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub fn parse_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!("failed to read {}: {}", path.display(), e), None)
    })?;
    parse_str(&text)
}

pub fn parse_str(text: &str) -> Result<AppConfig, ConfigError> {
    let tokens = Lexer::new(text)
        .tokenize()
        .map_err(|e| ConfigError::new(e, None))?;
    let mut cursor = Cursor::new(tokens);
    let mut servers = Vec::new();

    while cursor.peek().is_some() {
        let word = cursor.expect_word("server")?;
        if word != "server" {
            return Err(ConfigError::new(
                format!("expected 'server' block, found '{}'", word),
                cursor.prev_loc(),
            ));
        }
        cursor.expect(&TokenType::LBrace)?;
        let server = parse_server_block(&mut cursor)?;
        servers.push(server);
        cursor.expect(&TokenType::RBrace)?;
    }

    if servers.is_empty() {
        return Err(ConfigError::new("configuration defines no server blocks", None));
    }

    Ok(AppConfig { servers })
}

fn parse_server_block(cursor: &mut Cursor) -> Result<ServerConfig, ConfigError> {
    let mut cfg = ServerConfig::default();
    cfg.index.clear();
    let mut index_seen = false;
    let mut methods_seen = false;

    loop {
        match cursor.peek_kind() {
            Some(TokenType::RBrace) | None => break,
            Some(TokenType::Word(w)) if w == "location" => {
                cursor.advance();
                cursor.expect(&TokenType::LBrace)?;
                let loc = parse_location_block(cursor)?;
                cursor.expect(&TokenType::RBrace)?;
                cfg.locations.push(loc);
            }
            _ => {
                let (name, name_loc) = cursor.expect_directive_name()?;
                let args = cursor.collect_args()?;
                cursor.expect(&TokenType::Semicolon)?;
                apply_server_directive(
                    &mut cfg,
                    &name,
                    args,
                    name_loc,
                    &mut index_seen,
                    &mut methods_seen,
                )?;
            }
        }
    }

    if cfg.index.is_empty() {
        cfg.index.push("index.html".to_string());
    }

    Ok(cfg)
}

fn parse_location_block(cursor: &mut Cursor) -> Result<LocationConfig, ConfigError> {
    let mut route = None;
    let mut loc = LocationConfig::new(String::new());
    let mut index_seen = false;
    let mut methods_seen = false;

    loop {
        match cursor.peek_kind() {
            Some(TokenType::RBrace) | None => break,
            _ => {
                let (name, name_loc) = cursor.expect_directive_name()?;
                let args = cursor.collect_args()?;
                cursor.expect(&TokenType::Semicolon)?;
                if name == "route" {
                    if args.len() != 1 {
                        return Err(ConfigError::new("'route' takes exactly one argument", Some(name_loc)));
                    }
                    route = Some(args[0].clone());
                    continue;
                }
                apply_location_directive(&mut loc, &name, args, name_loc, &mut index_seen, &mut methods_seen)?;
            }
        }
    }

    loc.route = route.ok_or_else(|| {
        ConfigError::new("location block is missing a 'route' directive", None)
            .with_context("while parsing location block")
    })?;

    Ok(loc)
}

fn apply_server_directive(
    cfg: &mut ServerConfig,
    name: &str,
    args: Vec<String>,
    loc: Loc,
    index_seen: &mut bool,
    methods_seen: &mut bool,
) -> Result<(), ConfigError> {
    match name {
        "host" => cfg.host = single_arg(name, args, loc)?,
        "port" => cfg.port = parse_u16(name, single_arg(name, args, loc)?, loc)?,
        "server_name" => cfg.server_names = args,
        "default_server" => cfg.default_server = parse_bool(name, single_arg(name, args, loc)?, loc)?,
        "root" => cfg.root = single_arg(name, args, loc)?,
        "client_max_body_size" => {
            cfg.client_max_body_size = parse_size(name, single_arg(name, args, loc)?, loc)?
        }
        "client_timeout" => cfg.client_timeout_secs = parse_u64(name, single_arg(name, args, loc)?, loc)?,
        "autoindex" => cfg.autoindex = parse_bool(name, single_arg(name, args, loc)?, loc)?,
        "index" => {
            if *index_seen {
                return Err(ConfigError::new("duplicate 'index' directive", Some(loc)));
            }
            *index_seen = true;
            cfg.index = args;
        }
        "error_page" => {
            let (code_str, path) = split_last(name, args, loc)?;
            let code = parse_u16(name, code_str, loc)?;
            cfg.error_pages.insert(code, path);
        }
        "methods" => {
            if *methods_seen {
                return Err(ConfigError::new("duplicate 'methods' directive", Some(loc)));
            }
            *methods_seen = true;
            // methods at server scope has no effect on its own; accepted for forward
            // compatibility with location inheritance but otherwise ignored here.
        }
        other => {
            return Err(ConfigError::new(format!("unknown server directive '{}'", other), Some(loc)));
        }
    }
    Ok(())
}

fn apply_location_directive(
    loc_cfg: &mut LocationConfig,
    name: &str,
    args: Vec<String>,
    loc: Loc,
    index_seen: &mut bool,
    methods_seen: &mut bool,
) -> Result<(), ConfigError> {
    match name {
        "root" => loc_cfg.root = Some(single_arg(name, args, loc)?),
        "autoindex" => loc_cfg.autoindex = Some(parse_bool(name, single_arg(name, args, loc)?, loc)?),
        "index" => {
            if *index_seen {
                return Err(ConfigError::new("duplicate 'index' directive", Some(loc)));
            }
            *index_seen = true;
            loc_cfg.index = args;
        }
        "methods" => {
            if *methods_seen {
                return Err(ConfigError::new("duplicate 'methods' directive", Some(loc)));
            }
            *methods_seen = true;
            let mut methods = Vec::new();
            for a in args {
                methods.push(
                    a.parse::<Method>()
                        .map_err(|_| ConfigError::new(format!("unknown method '{}'", a), Some(loc)))?,
                );
            }
            loc_cfg.methods = methods;
        }
        "redirect" => loc_cfg.redirect = Some(single_arg(name, args, loc)?),
        "upload_store" => loc_cfg.upload_store = Some(single_arg(name, args, loc)?),
        "cgi_pass" => loc_cfg.cgi_pass = Some(single_arg(name, args, loc)?),
        "script_interpreter" => loc_cfg.script_interpreter = Some(single_arg(name, args, loc)?),
        "cgi_timeout" => loc_cfg.cgi_timeout_ms = Some(parse_u64(name, single_arg(name, args, loc)?, loc)?),
        "client_max_body_size" => {
            loc_cfg.client_max_body_size = Some(parse_size(name, single_arg(name, args, loc)?, loc)?)
        }
        "client_timeout" => {
            loc_cfg.client_timeout_secs = Some(parse_u64(name, single_arg(name, args, loc)?, loc)?)
        }
        other => {
            return Err(ConfigError::new(format!("unknown location directive '{}'", other), Some(loc)));
        }
    }
    Ok(())
}

fn single_arg(name: &str, args: Vec<String>, loc: Loc) -> Result<String, ConfigError> {
    if args.len() != 1 {
        return Err(ConfigError::new(
            format!("'{}' takes exactly one argument", name),
            Some(loc),
        ));
    }
    Ok(args.into_iter().next().unwrap())
}

fn split_last(name: &str, mut args: Vec<String>, loc: Loc) -> Result<(String, String), ConfigError> {
    if args.len() != 2 {
        return Err(ConfigError::new(
            format!("'{}' takes exactly two arguments", name),
            Some(loc),
        ));
    }
    let path = args.pop().unwrap();
    let code = args.pop().unwrap();
    Ok((code, path))
}

fn parse_u16(name: &str, s: String, loc: Loc) -> Result<u16, ConfigError> {
    s.parse::<u16>()
        .map_err(|_| ConfigError::new(format!("'{}' expects a numeric value, got '{}'", name, s), Some(loc)))
}

fn parse_u64(name: &str, s: String, loc: Loc) -> Result<u64, ConfigError> {
    s.parse::<u64>()
        .map_err(|_| ConfigError::new(format!("'{}' expects a numeric value, got '{}'", name, s), Some(loc)))
}

fn parse_bool(name: &str, s: String, loc: Loc) -> Result<bool, ConfigError> {
    match s.as_str() {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(ConfigError::new(
            format!("'{}' expects 'on' or 'off', got '{}'", name, s),
            Some(loc),
        )),
    }
}

fn parse_size(name: &str, s: String, loc: Loc) -> Result<usize, ConfigError> {
    let lower = s.to_lowercase();
    let (digits, mult) = if let Some(d) = lower.strip_suffix('k') {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('g') {
        (d, 1024 * 1024 * 1024)
    } else {
        (lower.as_str(), 1)
    };
    let n: usize = digits
        .parse()
        .map_err(|_| ConfigError::new(format!("'{}' expects a size value, got '{}'", name, s), Some(loc)))?;
    Ok(n * mult)
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenType> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn prev_loc(&self) -> Option<Loc> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|t| t.loc)
    }

    fn expect(&mut self, kind: &TokenType) -> Result<(), ConfigError> {
        match self.advance() {
            Some(t) if std::mem::discriminant(&t.kind) == std::mem::discriminant(kind) => Ok(()),
            Some(t) => Err(ConfigError::new(
                format!("unexpected token {:?}, expected {:?}", t.kind, kind),
                Some(t.loc),
            )),
            None => Err(ConfigError::new(
                format!("unexpected end of file, expected {:?}", kind),
                None,
            )),
        }
    }

    fn expect_word(&mut self, context: &str) -> Result<String, ConfigError> {
        match self.advance() {
            Some(Token {
                kind: TokenType::Word(w),
                ..
            }) => Ok(w),
            Some(t) => Err(ConfigError::new(
                format!("expected a word while parsing {}, found {:?}", context, t.kind),
                Some(t.loc),
            )),
            None => Err(ConfigError::new(
                format!("unexpected end of file while parsing {}", context),
                None,
            )),
        }
    }

    fn expect_directive_name(&mut self) -> Result<(String, Loc), ConfigError> {
        match self.advance() {
            Some(Token {
                kind: TokenType::Word(w),
                loc,
            }) => Ok((w, loc)),
            Some(t) => Err(ConfigError::new(
                format!("expected a directive name, found {:?}", t.kind),
                Some(t.loc),
            )),
            None => Err(ConfigError::new("unexpected end of file, expected a directive", None)),
        }
    }

    fn collect_args(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut args = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenType::Word(_)) | Some(TokenType::StringLit(_)) => {
                    let t = self.advance().unwrap();
                    match t.kind {
                        TokenType::Word(w) => args.push(w),
                        TokenType::StringLit(s) => args.push(s),
                        _ => unreachable!(),
                    }
                }
                _ => break,
            }
        }
        if args.is_empty() {
            return Err(ConfigError::new(
                "directive requires at least one argument",
                self.peek().map(|t| t.loc),
            ));
        }
        Ok(args)
    }
}
