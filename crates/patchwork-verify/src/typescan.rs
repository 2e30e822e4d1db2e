//! Syntax-tree facts about TypeScript and JavaScript sources.

use swc_common::sync::Lrc;
use swc_common::{FileName, SourceMap};
use swc_ecma_ast::{
    ClassDecl, ClassMethod, EsVersion, Expr, FnDecl, Pat, PropName, TsKeywordType,
    TsKeywordTypeKind, VarDeclarator,
};
use swc_ecma_parser::{Syntax, TsSyntax, parse_file_as_program};
use swc_ecma_visit::{Visit, VisitWith as _};

/// File extensions the scanner understands.
pub const SCANNED_EXTENSIONS: [&str; 6] = ["ts", "tsx", "mts", "cts", "js", "jsx"];

/// A method declared in a class body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFact {
    /// Method name
    pub name: String,
    /// Declared `static`
    pub is_static: bool,
}

/// A class declaration and its methods.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassFact {
    /// Class name
    pub name: String,
    /// Methods in declaration order
    pub methods: Vec<MethodFact>,
}

/// Everything the judge needs to know about one source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceFacts {
    /// `any` type annotations
    pub any_count: usize,
    /// Declared classes
    pub classes: Vec<ClassFact>,
    /// Free functions, including arrow functions bound to a name
    pub functions: Vec<String>,
}

impl SourceFacts {
    /// Class named `name`, if declared.
    pub fn class(&self, name: &str) -> Option<&ClassFact> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Every method of every class.
    pub fn methods(&self) -> impl Iterator<Item = &MethodFact> {
        self.classes.iter().flat_map(|class| class.methods.iter())
    }
}

/// Whether `path` has an extension the scanner understands.
pub fn is_scannable(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, extension)| SCANNED_EXTENSIONS.contains(&extension))
}

/// Parses `source` and collects its facts. `Err` carries the parse message.
///
/// # Errors
/// Returns the parser's message when `source` is not valid syntax.
pub fn scan(path: &str, source: &str) -> Result<SourceFacts, String> {
    let jsx = path.ends_with(".tsx") || path.ends_with(".jsx");
    let source_map = Lrc::new(SourceMap::default());
    let source_file = source_map.new_source_file(Lrc::new(FileName::Anon), source.to_owned());

    let syntax = Syntax::Typescript(TsSyntax {
        tsx: jsx,
        decorators: true,
        dts: path.ends_with(".d.ts"),
        no_early_errors: true,
        disallow_ambiguous_jsx_like: false,
    });

    let program = parse_file_as_program(&source_file, syntax, EsVersion::Es2022, None, &mut vec![])
        .map_err(|error| format!("{:?}", error.kind()))?;

    let mut collector = FactCollector::default();
    program.visit_with(&mut collector);
    Ok(collector.facts)
}

#[derive(Default)]
struct FactCollector {
    facts: SourceFacts,
    current_class: Option<usize>,
}

impl Visit for FactCollector {
    fn visit_ts_keyword_type(&mut self, node: &TsKeywordType) {
        if node.kind == TsKeywordTypeKind::TsAnyKeyword {
            self.facts.any_count += 1;
        }
    }

    fn visit_class_decl(&mut self, node: &ClassDecl) {
        self.facts.classes.push(ClassFact {
            name: node.ident.sym.to_string(),
            methods: Vec::new(),
        });
        let previous = self.current_class.replace(self.facts.classes.len() - 1);
        node.visit_children_with(self);
        self.current_class = previous;
    }

    fn visit_class_method(&mut self, node: &ClassMethod) {
        if let (Some(index), PropName::Ident(ident)) = (self.current_class, &node.key)
            && let Some(class) = self.facts.classes.get_mut(index)
        {
            class.methods.push(MethodFact {
                name: ident.sym.to_string(),
                is_static: node.is_static,
            });
        }
        node.visit_children_with(self);
    }

    fn visit_fn_decl(&mut self, node: &FnDecl) {
        if self.current_class.is_none() {
            self.facts.functions.push(node.ident.sym.to_string());
        }
        node.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, node: &VarDeclarator) {
        if self.current_class.is_none()
            && let Pat::Ident(binding) = &node.name
            && matches!(node.init.as_deref(), Some(Expr::Arrow(_) | Expr::Fn(_)))
        {
            self.facts.functions.push(binding.id.sym.to_string());
        }
        node.visit_children_with(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(path: &str, source: &str) -> SourceFacts {
        match scan(path, source) {
            Ok(facts) => facts,
            Err(error) => panic!("parse failed: {error}"),
        }
    }

    #[test]
    fn test_counts_any_but_not_comments_or_strings() {
        let source = "// any any any\nconst label = 'any';\nfunction load(input: any): Promise<any> {\n  return input as any;\n}\n";
        assert_eq!(facts("a.ts", source).any_count, 3);
    }

    #[test]
    fn test_collects_classes_methods_and_functions() {
        let source = "export class UserService {\n  list() { return []; }\n  static create() { return new UserService(); }\n}\nexport function helper() {}\nexport const mapUser = (user: User) => user;\nconst limit = 3;\n";
        let scanned = facts("user-service.ts", source);
        let Some(class) = scanned.class("UserService") else {
            panic!("class not found");
        };
        assert_eq!(
            class.methods,
            vec![
                MethodFact {
                    name: "list".to_owned(),
                    is_static: false
                },
                MethodFact {
                    name: "create".to_owned(),
                    is_static: true
                },
            ]
        );
        assert_eq!(scanned.functions, vec!["helper".to_owned(), "mapUser".to_owned()]);
    }

    #[test]
    fn test_tsx_and_syntax_errors() {
        let component = "export const View = () => <div>{value as any}</div>;\n";
        assert_eq!(facts("view.tsx", component).any_count, 1);
        let Err(message) = scan("broken.ts", "let value = ;\n") else {
            panic!("expected a syntax error");
        };
        assert!(!message.is_empty());
    }

    #[test]
    fn test_scannable_extensions() {
        assert!(is_scannable("src/a.ts"));
        assert!(is_scannable("src/view.tsx"));
        assert!(!is_scannable("README.md"));
        assert!(!is_scannable("Makefile"));
    }
}
