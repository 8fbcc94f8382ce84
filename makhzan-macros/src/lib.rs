//! The `#[provides]` attribute: Rust's analogue of `pinjected`'s
//! `@instance`/`@injected` decorators.
//!
//! Annotating an async function submits a [`RegisteredBinding`] to the
//! process-wide `inventory` collection the moment the crate that defines it
//! links in — the function itself is left untouched and still callable
//! directly. Nothing reads the registration unless a `Design` explicitly
//! asks for it via `Design::from_registry`.

use darling::ast::NestedMeta;
use darling::FromMeta;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, Ident, ItemFn, Pat, ReturnType, Type};

/// Optional arguments to `#[provides(...)]`.
#[derive(Debug, Default, FromMeta)]
struct ProvidesArgs {
    /// Overrides the binding's label (and therefore its default `BindKey`
    /// name); defaults to the function's own name.
    #[darling(default)]
    name: Option<String>,
}

/// Marks an async function as a binding: registers it with the implicit
/// registry under its name (or `name = "..."` if given), with one
/// dependency per parameter, resolved `ByName` under that parameter's own
/// identifier.
///
/// ```ignore
/// #[makhzan::provides]
/// async fn greeting() -> String {
///     "hello".to_string()
/// }
///
/// #[makhzan::provides(name = "shout")]
/// async fn shout_it(greeting: String) -> String {
///     format!("{}!", greeting.to_uppercase())
/// }
/// ```
#[proc_macro_attribute]
pub fn provides(attr: TokenStream, item: TokenStream) -> TokenStream {
    let meta = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(meta) => meta,
        Err(err) => return darling::Error::from(err).write_errors().into(),
    };
    let args = match ProvidesArgs::from_list(&meta) {
        Ok(args) => args,
        Err(err) => return err.write_errors().into(),
    };

    let func = parse_macro_input!(item as ItemFn);
    expand(args, func).unwrap_or_else(|err| err.to_compile_error()).into()
}

fn expand(args: ProvidesArgs, func: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    if func.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(&func.sig, "#[makhzan::provides] requires an `async fn`"));
    }

    let fn_name = func.sig.ident.clone();
    let label = args.name.unwrap_or_else(|| fn_name.to_string());
    let build_fn = format_ident!("__makhzan_build_{}", fn_name);

    let mut dep_names = Vec::new();
    let mut bindings = Vec::new();
    let mut call_args = Vec::new();

    for input in &func.sig.inputs {
        let FnArg::Typed(pat_type) = input else {
            return Err(syn::Error::new_spanned(input, "#[makhzan::provides] does not support `self` parameters"));
        };
        let Pat::Ident(pat_ident) = pat_type.pat.as_ref() else {
            return Err(syn::Error::new_spanned(&pat_type.pat, "#[makhzan::provides] parameters must be simple identifiers"));
        };
        let ident = pat_ident.ident.clone();
        let name = ident.to_string();
        let ty = pat_type.ty.as_ref().clone();

        dep_names.push(name.clone());
        bindings.push(downcast_binding(&ident, &name, &ty));
        call_args.push(ident);
    }

    let output_ty = match &func.sig.output {
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
        ReturnType::Default => syn::parse_quote!(()),
    };

    let expanded = quote! {
        #func

        #[doc(hidden)]
        fn #build_fn() -> ::makhzan_container::Injected<::makhzan_container::Value> {
            ::makhzan_container::Injected::<#output_ty>::bind(
                #label,
                [#(#dep_names),*],
                |args: ::makhzan_container::ProvidedArgs| async move {
                    #(#bindings)*
                    Ok(#fn_name(#(#call_args),*).await)
                },
            )
            .erase()
        }

        ::makhzan_container::inventory::submit! {
            ::makhzan_container::RegisteredBinding { label: #label, build: #build_fn }
        }
    };

    Ok(expanded)
}

fn downcast_binding(ident: &Ident, name: &str, ty: &Type) -> proc_macro2::TokenStream {
    quote! {
        let #ident: #ty = args
            .get(#name)
            .and_then(|value| value.downcast_ref::<#ty>())
            .cloned()
            .unwrap_or_else(|| panic!(concat!("makhzan: dependency \"", #name, "\" missing or of the wrong type")));
    }
}
