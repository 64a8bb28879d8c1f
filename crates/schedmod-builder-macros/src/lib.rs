use proc_macro::TokenStream;

use quote::quote;
use syn::{
    Attribute, Expr, ExprArray, ExprLit, ExprPath, ItemStruct, Lit, Meta, Token, parse::Parser,
    spanned::Spanned,
};

/// Declares a pipeline step.
///
/// Generates `ID`/`MODULE`/`PHASE`/`CONFIG_PATH` constants plus `plan` and
/// `exec` functions. The annotated struct is the step's config (read from
/// `[<module>.steps.<step>]`) and must provide `enabled`, `label` and
/// `Default`, and an associated
/// `fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()>`.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Task(attr: TokenStream, item: TokenStream) -> TokenStream {
    match task_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

/// Groups steps into a module that participates in the listed run modes.
#[proc_macro_attribute]
#[allow(non_snake_case)]
pub fn Module(attr: TokenStream, item: TokenStream) -> TokenStream {
    match module_impl(attr, item) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn lit_str(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        _ => Err(syn::Error::new(expr.span(), "expected string literal")),
    }
}

fn lit_bool(expr: &Expr) -> syn::Result<bool> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Bool(b), ..
        }) => Ok(b.value),
        _ => Err(syn::Error::new(expr.span(), "expected bool literal")),
    }
}

fn expr_array_strings(expr: &Expr) -> syn::Result<Vec<String>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    elems.iter().map(lit_str).collect()
}

fn expr_array_paths(expr: &Expr) -> syn::Result<Vec<syn::Path>> {
    let Expr::Array(ExprArray { elems, .. }) = expr else {
        return Err(syn::Error::new(expr.span(), "expected array literal"));
    };
    let mut out = Vec::new();
    for e in elems {
        match e {
            Expr::Path(ExprPath { path, .. }) => out.push(path.clone()),
            _ => return Err(syn::Error::new(e.span(), "expected path (identifier)")),
        }
    }
    Ok(out)
}

fn drop_our_attrs(attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|a| {
            let Meta::Path(p) = &a.meta else {
                return true;
            };
            let Some(ident) = p.get_ident() else {
                return true;
            };
            ident != "Task" && ident != "Module"
        })
        .cloned()
        .collect()
}

fn parse_key_values(attr: TokenStream) -> syn::Result<Vec<(String, Expr, proc_macro2::Span)>> {
    let parser = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated;
    let metas = parser.parse(attr)?;
    let mut out = Vec::new();
    for m in metas {
        let Meta::NameValue(nv) = m else {
            return Err(syn::Error::new(m.span(), "expected key = value"));
        };
        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
            return Err(syn::Error::new(nv.path.span(), "expected ident key"));
        };
        out.push((key, nv.value, nv.path.span()));
    }
    Ok(out)
}

struct TaskMeta {
    id: String,
    module: String,
    phase: String,
    provides: Vec<String>,
    after: Vec<String>,
    default_label: String,
    read_only: bool,
}

fn task_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let mut id: Option<String> = None;
    let mut module: Option<String> = None;
    let mut phase: Option<String> = None;
    let mut provides: Vec<String> = Vec::new();
    let mut after: Vec<String> = Vec::new();
    let mut default_label: Option<String> = None;
    let mut read_only = false;

    for (key, v, span) in parse_key_values(attr)? {
        match key.as_str() {
            "id" => id = Some(lit_str(&v)?),
            "module" => module = Some(lit_str(&v)?),
            "phase" => phase = Some(lit_str(&v)?),
            "provides" => provides = expr_array_strings(&v)?,
            "after" => after = expr_array_strings(&v)?,
            "default_label" => default_label = Some(lit_str(&v)?),
            "read_only" => read_only = lit_bool(&v)?,
            other => {
                return Err(syn::Error::new(
                    span,
                    format!("unknown Task attribute key '{other}'"),
                ));
            }
        }
    }

    let id = id.ok_or_else(|| syn::Error::new(struct_ident.span(), "Task: missing id"))?;
    let module =
        module.ok_or_else(|| syn::Error::new(struct_ident.span(), "Task: missing module"))?;
    if !id.starts_with(&format!("{module}.")) {
        return Err(syn::Error::new(
            struct_ident.span(),
            "Task: id must start with '<module>.'",
        ));
    }

    let meta = TaskMeta {
        phase: phase.ok_or_else(|| syn::Error::new(struct_ident.span(), "Task: missing phase"))?,
        default_label: default_label
            .ok_or_else(|| syn::Error::new(struct_ident.span(), "Task: missing default_label"))?,
        id,
        module,
        provides,
        after,
        read_only,
    };

    // Step config lives at <module>.steps.<step>, step being the id's last segment.
    let step = meta.id.rsplit('.').next().unwrap_or_default().to_string();
    let config_path_lit = format!("{}.steps.{}", meta.module, step);

    let id_lit = &meta.id;
    let module_lit = &meta.module;
    let phase_lit = &meta.phase;
    let default_label_lit = &meta.default_label;
    let read_only = meta.read_only;
    let provides_lits = &meta.provides;
    let after_lits = &meta.after;

    let expanded = quote! {
        #st

        impl #struct_ident {
            pub const ID: &'static str = #id_lit;
            pub const MODULE: &'static str = #module_lit;
            pub const PHASE: &'static str = #phase_lit;
            pub const CONFIG_PATH: &'static str = #config_path_lit;
            pub const READ_ONLY: bool = #read_only;

            fn load_step(doc: &crate::config::ConfigDoc) -> crate::Result<Self> {
                let cfg: Self = doc
                    .deserialize_path::<Self>(#config_path_lit)?
                    .unwrap_or_default();
                if !cfg.enabled {
                    return Err(crate::Error::config(format!(
                        "[{}].enabled=false is not allowed (pipeline steps cannot be skipped)",
                        #config_path_lit
                    )));
                }
                Ok(cfg)
            }

            pub fn plan(doc: &crate::config::ConfigDoc, plan: &mut crate::planner::Plan) -> crate::Result<()> {
                let cfg = Self::load_step(doc)?;
                let label = cfg
                    .label
                    .clone()
                    .unwrap_or_else(|| #default_label_lit.to_string());

                plan.add(crate::planner::Task {
                    id: #id_lit.to_string(),
                    label,
                    module: #module_lit.to_string(),
                    phase: #phase_lit.to_string(),
                    after: vec![#(#after_lits.to_string()),*],
                    provides: vec![#(#provides_lits.to_string()),*],
                })?;
                Ok(())
            }

            pub fn exec(doc: &crate::config::ConfigDoc, ctx: &mut crate::executor::ExecCtx) -> crate::Result<()> {
                let cfg = Self::load_step(doc)?;

                if ctx.dry_run && !Self::READ_ONLY {
                    ctx.log(&format!("DRY-RUN: exec {}", #id_lit));
                    return Ok(());
                }

                Self::run(&cfg, doc, ctx)
            }
        }
    };

    Ok(expanded.into())
}

fn module_impl(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let mut st: ItemStruct = syn::parse(item)?;
    st.attrs = drop_our_attrs(&st.attrs);
    let struct_ident = st.ident.clone();

    let mut id: Option<String> = None;
    let mut modes: Option<Vec<String>> = None;
    let mut tasks: Option<Vec<syn::Path>> = None;

    for (key, v, span) in parse_key_values(attr)? {
        match key.as_str() {
            "id" => id = Some(lit_str(&v)?),
            "modes" => modes = Some(expr_array_strings(&v)?),
            "tasks" => tasks = Some(expr_array_paths(&v)?),
            other => {
                return Err(syn::Error::new(
                    span,
                    format!("unknown Module attribute key '{other}'"),
                ));
            }
        }
    }

    let id_lit = id.ok_or_else(|| syn::Error::new(struct_ident.span(), "Module: missing id"))?;
    let modes =
        modes.ok_or_else(|| syn::Error::new(struct_ident.span(), "Module: missing modes"))?;
    let tasks =
        tasks.ok_or_else(|| syn::Error::new(struct_ident.span(), "Module: missing tasks"))?;

    let call_tasks = tasks.iter().map(|p| quote! { #p::plan(doc, plan)?; });
    let reg_tasks = tasks.iter().map(|p| quote! { reg.add(#p::ID, #p::exec)?; });

    let expanded = quote! {
        #st

        impl crate::modules::Module for #struct_ident {
            fn id(&self) -> &'static str {
                #id_lit
            }

            fn detect(&self, doc: &crate::config::ConfigDoc) -> bool {
                match doc.run_mode() {
                    Some(mode) => [#(#modes),*].contains(&mode.as_str()),
                    None => false,
                }
            }

            fn plan(&self, doc: &crate::config::ConfigDoc, plan: &mut crate::planner::Plan) -> crate::Result<()> {
                #(#call_tasks)*
                Ok(())
            }
        }

        impl crate::executor::ModuleExec for #struct_ident {
            fn register_tasks(reg: &mut crate::executor::TaskRegistry) -> crate::Result<()> {
                #(#reg_tasks)*
                Ok(())
            }
        }
    };

    Ok(expanded.into())
}
