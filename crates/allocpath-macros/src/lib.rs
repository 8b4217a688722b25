use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ImplItem, Item, ItemFn};

/// Instruments a function as an allocation-path call point.
///
/// The function body runs inside a `CallGuard`: a push notification fires
/// immediately before the body and the matching pop fires on every exit
/// path (return or panic), exactly once per invocation and correctly
/// nested with inner tracked functions. The call site is interned in the
/// installed tracker context the first time it executes; with no context
/// installed the guard is a no-op.
///
/// ```rust,ignore
/// #[allocpath::track]
/// fn load_chunk(id: u32) -> Vec<u8> {
///     read_from_disk(id)
/// }
/// ```
///
/// # Async functions
///
/// Async functions are rejected at compile time: the per-thread call-depth
/// accumulator cannot follow a task that migrates between runtime threads,
/// so attribution would silently be wrong.
#[proc_macro_attribute]
pub fn track(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    if let Some(asyncness) = &input.sig.asyncness {
        return syn::Error::new_spanned(
            asyncness,
            "#[allocpath::track] does not support async functions: \
             allocation paths cannot follow tasks across threads",
        )
        .to_compile_error()
        .into();
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            static __ALLOCPATH_CALL_POINT: ::std::sync::OnceLock<::allocpath::CallPointId> =
                ::std::sync::OnceLock::new();
            let __allocpath_guard = ::allocpath::CallGuard::enter(
                &__ALLOCPATH_CALL_POINT,
                concat!(module_path!(), "::", #name),
            );
            #block
        }
    };

    output.into()
}

/// Marks a function to be excluded from [`track_all`](macro@track_all).
#[proc_macro_attribute]
pub fn skip(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

/// Applies [`track`](macro@track) to every sync function in a module or
/// impl block, except those marked `#[allocpath::skip]`. Async functions
/// are passed through untouched.
#[proc_macro_attribute]
pub fn track_all(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let parsed_item = parse_macro_input!(item as Item);

    match parsed_item {
        Item::Mod(mut module) => {
            if let Some((_brace, items)) = &mut module.content {
                for it in items.iter_mut() {
                    if let Item::Fn(func) = it {
                        if func.sig.asyncness.is_none() && !has_skip(&func.attrs) {
                            let func_tokens = TokenStream::from(quote!(#func));
                            let transformed = track(TokenStream::new(), func_tokens);
                            *func = syn::parse_macro_input!(transformed as ItemFn);
                        }
                    }
                }
            }
            TokenStream::from(quote!(#module))
        }
        Item::Impl(mut impl_block) => {
            for item in impl_block.items.iter_mut() {
                if let ImplItem::Fn(method) = item {
                    if method.sig.asyncness.is_none() && !has_skip(&method.attrs) {
                        let method_tokens = TokenStream::from(quote!(#method));
                        let transformed = track(TokenStream::new(), method_tokens);
                        *method = syn::parse_macro_input!(transformed as syn::ImplItemFn);
                    }
                }
            }
            TokenStream::from(quote!(#impl_block))
        }
        _ => panic!("track_all can only be applied to modules or impl blocks"),
    }
}

fn has_skip(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("skip")
            || (attr.path().segments.len() == 2
                && attr.path().segments[0].ident == "allocpath"
                && attr.path().segments[1].ident == "skip")
    })
}
