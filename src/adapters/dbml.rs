//! DBML reader.
//!
//! Covers the parts of the language that describe data: tables, columns and
//! their settings, relationships (top-level, block and inline) and enums.
//! `Project`, `TableGroup`, `TablePartial`, index blocks and sticky notes are
//! recognised and skipped.

use crate::domain::schema::{
    Cardinality, Column, Endpoint, EnumType, Relationship, Schema, Table,
};
use crate::utils::error::{NotebookError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    Expr(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    Lt,
    Gt,
    Minus,
    Ne,
    Newline,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

#[derive(Debug)]
struct Setting {
    key: String,
    value: Vec<Token>,
    line: usize,
}

pub fn parse_dbml(source: &str) -> Result<Schema> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_document()
}

fn syntax_error(line: usize, message: impl Into<String>) -> NotebookError {
    NotebookError::SchemaParseError {
        line,
        message: message.into(),
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !"{}[]():,.<>'\"`".contains(c)
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    let push = |tokens: &mut Vec<Token>, tok: Tok, line: usize| tokens.push(Token { tok, line });

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                push(&mut tokens, Tok::Newline, line);
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let start_line = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax_error(start_line, "unterminated block comment")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '\'' if next == Some('\'') && chars.get(i + 2) == Some(&'\'') => {
                let start_line = line;
                i += 3;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(syntax_error(start_line, "unterminated ''' string")),
                        Some('\'')
                            if chars.get(i + 1) == Some(&'\'')
                                && chars.get(i + 2) == Some(&'\'') =>
                        {
                            i += 3;
                            break;
                        }
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                push(&mut tokens, Tok::Str(dedent(&text)), start_line);
            }
            '\'' | '"' | '`' => {
                let start_line = line;
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(syntax_error(
                                start_line,
                                format!("unterminated {} string", quote),
                            ))
                        }
                        Some('\\') if chars.get(i + 1) == Some(&quote) => {
                            text.push(quote);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                let tok = if quote == '`' {
                    Tok::Expr(text)
                } else {
                    Tok::Str(text)
                };
                push(&mut tokens, tok, start_line);
            }
            '{' | '}' | '[' | ']' | '(' | ')' | ':' | ',' | '.' | '>' | '-' => {
                let tok = match c {
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    ':' => Tok::Colon,
                    ',' => Tok::Comma,
                    '.' => Tok::Dot,
                    '>' => Tok::Gt,
                    _ => Tok::Minus,
                };
                push(&mut tokens, tok, line);
                i += 1;
            }
            '<' => {
                if next == Some('>') {
                    push(&mut tokens, Tok::Ne, line);
                    i += 2;
                } else {
                    push(&mut tokens, Tok::Lt, line);
                    i += 1;
                }
            }
            _ => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) && chars[i] != '-' {
                    if chars[i] == '/' && matches!(chars.get(i + 1), Some('/') | Some('*')) {
                        break;
                    }
                    i += 1;
                }
                if i == start {
                    return Err(syntax_error(line, format!("unexpected character '{}'", c)));
                }
                push(&mut tokens, Tok::Word(chars[start..i].iter().collect()), line);
            }
        }
    }

    Ok(tokens)
}

/// Multi-line strings drop the indentation shared by their lines.
fn dedent(text: &str) -> String {
    let text = text.strip_prefix('\n').unwrap_or(text);
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|l| l.get(indent..).unwrap_or(l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while self.peek() == Some(&Tok::Newline) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(syntax_error(self.line(), format!("expected {}", what)))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Word(w)) | Some(Tok::Str(w)) => {
                let name = w.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(syntax_error(self.line(), "expected a name")),
        }
    }

    fn qualified_name(&mut self) -> Result<(Option<String>, String)> {
        let first = self.name()?;
        if self.peek() == Some(&Tok::Dot) {
            self.pos += 1;
            let second = self.name()?;
            Ok((Some(first), second))
        } else {
            Ok((None, first))
        }
    }

    fn parse_document(mut self) -> Result<Schema> {
        let mut schema = Schema::default();
        let mut inline_refs = Vec::new();

        loop {
            self.skip_newlines();
            let keyword = match self.peek() {
                None => break,
                Some(Tok::Word(w)) => w.to_lowercase(),
                Some(_) => return Err(syntax_error(self.line(), "expected a top-level element")),
            };

            match keyword.as_str() {
                "table" => {
                    let (table, refs) = self.parse_table()?;
                    schema.tables.push(table);
                    inline_refs.extend(refs);
                }
                "ref" => schema.relationships.extend(self.parse_ref()?),
                "enum" => schema.enums.push(self.parse_enum()?),
                "project" => {
                    self.pos += 1;
                    if matches!(self.peek(), Some(Tok::Word(_)) | Some(Tok::Str(_))) {
                        schema.project = Some(self.name()?);
                    }
                    self.skip_rest_of_element()?;
                }
                "tablegroup" | "tablepartial" | "note" | "records" => {
                    self.pos += 1;
                    self.skip_rest_of_element()?;
                }
                other => {
                    return Err(syntax_error(
                        self.line(),
                        format!("unknown element '{}'", other),
                    ))
                }
            }
        }

        schema.relationships.extend(inline_refs);
        Ok(schema)
    }

    /// Skips to the end of the current line, or past a `{ ... }` block if one opens first.
    fn skip_rest_of_element(&mut self) -> Result<()> {
        while let Some(token) = self.advance() {
            match token.tok {
                Tok::LBrace => return self.skip_block(token.line),
                Tok::Newline => return Ok(()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Assumes the opening brace was consumed.
    fn skip_block(&mut self, opened_at: usize) -> Result<()> {
        let mut depth = 1;
        while let Some(token) = self.advance() {
            match token.tok {
                Tok::LBrace => depth += 1,
                Tok::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(syntax_error(opened_at, "unterminated block"))
    }

    fn parse_table(&mut self) -> Result<(Table, Vec<Relationship>)> {
        let opened_at = self.line();
        self.pos += 1;
        let (schema, name) = self.qualified_name()?;

        let mut alias = None;
        if self.at_keyword("as") {
            self.pos += 1;
            alias = Some(self.name()?);
        }

        let mut note = None;
        if self.peek() == Some(&Tok::LBracket) {
            for setting in self.parse_settings()? {
                if setting.key == "note" {
                    note = Some(render_value(&setting.value));
                }
            }
        }

        self.skip_newlines();
        self.expect(Tok::LBrace, &format!("'{{' after table '{}'", name))?;

        let mut table = Table {
            schema,
            name,
            alias,
            columns: Vec::new(),
            note,
        };
        let mut refs = Vec::new();

        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    return Err(syntax_error(
                        opened_at,
                        format!("table '{}' is not closed", table.name),
                    ))
                }
                Some(Tok::RBrace) => {
                    self.pos += 1;
                    break;
                }
                Some(Tok::Word(w))
                    if w.eq_ignore_ascii_case("indexes")
                        && self.peek_at(1) == Some(&Tok::LBrace) =>
                {
                    let line = self.line();
                    self.pos += 2;
                    self.skip_block(line)?;
                }
                Some(Tok::Word(w))
                    if w.eq_ignore_ascii_case("note") && self.peek_at(1) == Some(&Tok::Colon) =>
                {
                    self.pos += 2;
                    table.note = Some(self.name()?);
                }
                Some(Tok::Word(w))
                    if w.eq_ignore_ascii_case("note") && self.peek_at(1) == Some(&Tok::LBrace) =>
                {
                    self.pos += 2;
                    self.skip_newlines();
                    table.note = Some(self.name()?);
                    self.skip_newlines();
                    self.expect(Tok::RBrace, "'}' after table note")?;
                }
                Some(Tok::Word(w)) if w.starts_with('~') => {
                    self.skip_rest_of_element()?;
                }
                Some(Tok::Word(_)) | Some(Tok::Str(_)) => {
                    let (column, inline) = self.parse_column(&table)?;
                    table.columns.push(column);
                    refs.extend(inline);
                }
                Some(_) => {
                    return Err(syntax_error(
                        self.line(),
                        format!("unexpected token in table '{}'", table.name),
                    ))
                }
            }
        }

        Ok((table, refs))
    }

    fn parse_column(&mut self, table: &Table) -> Result<(Column, Vec<Relationship>)> {
        let line = self.line();
        let name = self.name()?;

        let mut data_type = String::new();
        let mut depth = 0usize;
        let mut last_was_word = false;
        loop {
            let piece = match self.peek() {
                Some(Tok::Word(w)) | Some(Tok::Str(w)) => {
                    let piece = if last_was_word {
                        format!(" {}", w)
                    } else {
                        w.clone()
                    };
                    last_was_word = true;
                    piece
                }
                Some(Tok::LParen) => {
                    depth += 1;
                    last_was_word = false;
                    "(".to_string()
                }
                Some(Tok::RParen) if depth > 0 => {
                    depth -= 1;
                    last_was_word = false;
                    ")".to_string()
                }
                Some(Tok::Comma) if depth > 0 => {
                    last_was_word = false;
                    ",".to_string()
                }
                Some(Tok::Dot) => {
                    last_was_word = false;
                    ".".to_string()
                }
                _ => break,
            };
            data_type.push_str(&piece);
            self.pos += 1;
        }

        if data_type.is_empty() {
            return Err(syntax_error(line, format!("column '{}' has no type", name)));
        }

        let mut column = Column {
            name,
            data_type,
            ..Column::default()
        };
        let mut refs = Vec::new();

        if self.peek() == Some(&Tok::LBracket) {
            for setting in self.parse_settings()? {
                match setting.key.as_str() {
                    "pk" | "primary key" => column.primary_key = true,
                    "not null" => column.not_null = true,
                    "null" => column.not_null = false,
                    "unique" => column.unique = true,
                    "increment" => column.increment = true,
                    "default" => column.default = Some(render_value(&setting.value)),
                    "note" => column.note = Some(render_value(&setting.value)),
                    "ref" => {
                        let mut inner = Parser::new(setting.value);
                        if inner.peek().is_none() {
                            return Err(syntax_error(setting.line, "empty inline ref"));
                        }
                        let cardinality = inner.relation_op()?;
                        let to = inner.endpoint()?;
                        refs.push(Relationship {
                            name: None,
                            from: Endpoint {
                                schema: table.schema.clone(),
                                table: table.name.clone(),
                                columns: vec![column.name.clone()],
                            },
                            to,
                            cardinality,
                        });
                    }
                    other => tracing::debug!("ignoring column setting '{}'", other),
                }
            }
        }

        match self.peek() {
            None | Some(Tok::Newline) | Some(Tok::RBrace) => Ok((column, refs)),
            Some(_) => Err(syntax_error(
                self.line(),
                format!("unexpected token after column '{}'", column.name),
            )),
        }
    }

    fn parse_settings(&mut self) -> Result<Vec<Setting>> {
        let opened_at = self.line();
        self.expect(Tok::LBracket, "'['")?;
        let mut settings = Vec::new();

        loop {
            self.skip_newlines();
            match self.peek() {
                None => return Err(syntax_error(opened_at, "unterminated settings list")),
                Some(Tok::RBracket) => {
                    self.pos += 1;
                    break;
                }
                _ => {}
            }

            let line = self.line();
            let mut words = Vec::new();
            while let Some(Tok::Word(w)) = self.peek() {
                words.push(w.to_lowercase());
                self.pos += 1;
            }
            if words.is_empty() {
                return Err(syntax_error(line, "expected a setting name"));
            }

            let mut value = Vec::new();
            if self.peek() == Some(&Tok::Colon) {
                self.pos += 1;
                let mut depth = 0usize;
                loop {
                    match self.peek() {
                        None => break,
                        Some(Tok::Comma) | Some(Tok::RBracket) if depth == 0 => break,
                        Some(Tok::Newline) => self.pos += 1,
                        Some(tok) => {
                            match tok {
                                Tok::LParen => depth += 1,
                                Tok::RParen => depth = depth.saturating_sub(1),
                                _ => {}
                            }
                            if let Some(token) = self.advance() {
                                value.push(token);
                            }
                        }
                    }
                }
            }

            settings.push(Setting {
                key: words.join(" "),
                value,
                line,
            });

            self.skip_newlines();
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(Tok::RBracket) => {}
                _ => return Err(syntax_error(self.line(), "expected ',' or ']' in settings")),
            }
        }

        Ok(settings)
    }

    fn relation_op(&mut self) -> Result<Cardinality> {
        let cardinality = match self.peek() {
            Some(Tok::Gt) => Cardinality::ManyToOne,
            Some(Tok::Lt) => Cardinality::OneToMany,
            Some(Tok::Minus) => Cardinality::OneToOne,
            Some(Tok::Ne) => Cardinality::ManyToMany,
            _ => {
                return Err(syntax_error(
                    self.line(),
                    "expected a relationship operator ('>', '<', '-' or '<>')",
                ))
            }
        };
        self.pos += 1;
        Ok(cardinality)
    }

    /// `table.column`, `schema.table.column` or `table.(a, b)`.
    fn endpoint(&mut self) -> Result<Endpoint> {
        let line = self.line();
        let mut parts = vec![self.name()?];
        let mut composite = None;

        while self.peek() == Some(&Tok::Dot) {
            self.pos += 1;
            if self.peek() == Some(&Tok::LParen) {
                self.pos += 1;
                let mut columns = vec![self.name()?];
                while self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                    columns.push(self.name()?);
                }
                self.expect(Tok::RParen, "')' closing composite columns")?;
                composite = Some(columns);
                break;
            }
            parts.push(self.name()?);
        }

        let columns = match composite {
            Some(columns) => columns,
            None if parts.len() >= 2 => parts.pop().into_iter().collect(),
            None => {
                return Err(syntax_error(
                    line,
                    format!("relationship endpoint '{}' has no column", parts[0]),
                ))
            }
        };

        match parts.len() {
            1 => Ok(Endpoint {
                schema: None,
                table: parts.remove(0),
                columns,
            }),
            2 => {
                let table = parts.remove(1);
                Ok(Endpoint {
                    schema: Some(parts.remove(0)),
                    table,
                    columns,
                })
            }
            _ => Err(syntax_error(line, "relationship endpoint has too many parts")),
        }
    }

    fn relation(&mut self, name: Option<String>) -> Result<Relationship> {
        let from = self.endpoint()?;
        let cardinality = self.relation_op()?;
        let to = self.endpoint()?;
        if self.peek() == Some(&Tok::LBracket) {
            // delete/update actions do not affect the notebook
            self.parse_settings()?;
        }
        Ok(Relationship {
            name,
            from,
            to,
            cardinality,
        })
    }

    fn parse_ref(&mut self) -> Result<Vec<Relationship>> {
        let opened_at = self.line();
        self.pos += 1;

        let mut name = None;
        if matches!(self.peek(), Some(Tok::Word(_)) | Some(Tok::Str(_)))
            && matches!(self.peek_at(1), Some(Tok::Colon) | Some(Tok::LBrace))
        {
            name = Some(self.name()?);
        }

        match self.peek() {
            Some(Tok::Colon) => {
                self.pos += 1;
                Ok(vec![self.relation(name)?])
            }
            Some(Tok::LBrace) => {
                self.pos += 1;
                let mut relationships = Vec::new();
                loop {
                    self.skip_newlines();
                    match self.peek() {
                        None => return Err(syntax_error(opened_at, "unterminated Ref block")),
                        Some(Tok::RBrace) => {
                            self.pos += 1;
                            break;
                        }
                        _ => relationships.push(self.relation(name.clone())?),
                    }
                }
                Ok(relationships)
            }
            _ => Err(syntax_error(self.line(), "expected ':' or '{' after Ref")),
        }
    }

    fn parse_enum(&mut self) -> Result<EnumType> {
        let opened_at = self.line();
        self.pos += 1;
        let (_, name) = self.qualified_name()?;
        self.skip_newlines();
        self.expect(Tok::LBrace, &format!("'{{' after enum '{}'", name))?;

        let mut values = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                None => {
                    return Err(syntax_error(
                        opened_at,
                        format!("enum '{}' is not closed", name),
                    ))
                }
                Some(Tok::RBrace) => {
                    self.pos += 1;
                    break;
                }
                _ => {
                    values.push(self.name()?);
                    if self.peek() == Some(&Tok::LBracket) {
                        self.parse_settings()?;
                    }
                }
            }
        }

        Ok(EnumType { name, values })
    }
}

fn render_value(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut last_was_word = false;
    for token in tokens {
        let (piece, is_word) = match &token.tok {
            Tok::Word(w) => (w.as_str(), true),
            Tok::Str(s) | Tok::Expr(s) => (s.as_str(), false),
            Tok::LParen => ("(", false),
            Tok::RParen => (")", false),
            Tok::Comma => (",", false),
            Tok::Dot => (".", false),
            Tok::Minus => ("-", false),
            Tok::Lt => ("<", false),
            Tok::Gt => (">", false),
            Tok::Ne => ("<>", false),
            Tok::Colon => (":", false),
            Tok::LBrace | Tok::RBrace | Tok::LBracket | Tok::RBracket | Tok::Newline => {
                continue
            }
        };
        if is_word && last_was_word {
            out.push(' ');
        }
        out.push_str(piece);
        last_was_word = is_word;
    }
    out
}
